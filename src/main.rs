use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use sage::api::{ServeArgs, build_server_config, run_http_server};
use sage::core::{enforce_cashflow_horizon, log_key_metrics, parse_agent_response};

#[derive(Parser, Debug)]
#[command(
    name = "sage",
    about = "Retirement planning backend: agent output validation and cashflow horizon normalization"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Normalize a JSON cashflow list into the six checkpoint years.
    Normalize {
        #[arg(help = "JSON file to read; stdin when omitted")]
        input: Option<PathBuf>,
    },
    /// Extract and validate an analysis from raw agent output.
    Analyze {
        #[arg(help = "Agent output file to read; stdin when omitted")]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Normalize { input } => normalize(input),
        Command::Analyze { input } => analyze(input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("Error: {msg}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn serve(args: ServeArgs) -> Result<(), String> {
    let config = build_server_config(args)?;
    run_http_server(config)
        .await
        .map_err(|e| format!("server error: {e}"))
}

fn normalize(input: Option<PathBuf>) -> Result<(), String> {
    let raw = read_input(input)?;
    let payload = serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "input is not JSON, using zero series");
        Value::Null
    });
    let cashflows = enforce_cashflow_horizon(&payload);
    print_json(&cashflows)
}

fn analyze(input: Option<PathBuf>) -> Result<(), String> {
    let raw = read_input(input)?;
    let analysis = parse_agent_response(&raw).map_err(|e| e.to_string())?;
    log_key_metrics(&analysis);
    print_json(&analysis)
}

fn read_input(input: Option<PathBuf>) -> Result<String, String> {
    match input {
        Some(path) => fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
