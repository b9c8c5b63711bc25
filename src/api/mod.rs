use axum::{
    Router,
    body::Bytes,
    extract::{Json, Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::core::{
    AnalysisOutput, Catalogue, CashflowPoint, QUICK_SCENARIOS, UserProfile,
    enforce_cashflow_horizon, log_key_metrics, parse_agent_response,
};

const DEFAULT_RISK: &str = "medium";

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(
        long,
        env = "SAGE_HOST",
        default_value = "0.0.0.0",
        help = "IP address to bind"
    )]
    pub host: String,
    #[arg(long, env = "SAGE_PORT", default_value_t = 8080)]
    pub port: u16,
    #[arg(
        long,
        env = "SAGE_DATA_DIR",
        default_value = "data",
        help = "Directory holding user_profiles.json and investment_products.json"
    )]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
}

#[derive(Clone)]
struct AppState {
    catalogue: Arc<Catalogue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProductsQuery {
    risk: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisRequest {
    response: String,
}

#[derive(Debug, Serialize)]
struct AnalysisResponse {
    response: String,
    analysis: Option<AnalysisOutput>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct NormalizeResponse {
    cashflows: Vec<CashflowPoint>,
}

#[derive(Debug, Serialize)]
struct ProfilesResponse<'a> {
    profiles: &'a [UserProfile],
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_server_config(args: ServeArgs) -> Result<ServerConfig, String> {
    let host = args
        .host
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| format!("--host must be an IP address, got {:?}", args.host))?;

    if args.port == 0 {
        return Err("--port must be > 0".to_string());
    }

    if args.data_dir.as_os_str().is_empty() {
        return Err("--data-dir must not be empty".to_string());
    }

    if args.data_dir.exists() && !args.data_dir.is_dir() {
        return Err("--data-dir must be a directory".to_string());
    }

    Ok(ServerConfig {
        addr: SocketAddr::new(host, args.port),
        data_dir: args.data_dir,
    })
}

pub fn router(catalogue: Catalogue) -> Router {
    let state = AppState {
        catalogue: Arc::new(catalogue),
    };
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/profiles", get(profiles_handler))
        .route("/profiles/:id", get(profile_handler))
        .route("/scenarios", get(scenarios_handler))
        .route("/api/products", get(products_handler))
        .route("/api/cashflows/normalize", post(normalize_handler))
        .route("/api/analysis", post(analysis_handler))
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_http_server(config: ServerConfig) -> std::io::Result<()> {
    let catalogue = Catalogue::load(&config.data_dir);
    let app = router(catalogue);

    let listener = TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "retirement planning API listening");

    axum::serve(listener, app).await
}

async fn root_handler() -> Response {
    json_response(
        StatusCode::OK,
        json!({ "message": "Retirement Planning API", "status": "active" }),
    )
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        json!({ "status": "healthy", "profiles": state.catalogue.profiles.len() }),
    )
}

async fn profiles_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        ProfilesResponse {
            profiles: &state.catalogue.profiles,
        },
    )
}

async fn profile_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.catalogue.profile(&id) {
        Some(profile) => json_response(StatusCode::OK, profile),
        None => error_response(StatusCode::NOT_FOUND, "Profile not found"),
    }
}

async fn scenarios_handler() -> Response {
    json_response(StatusCode::OK, json!({ "scenarios": QUICK_SCENARIOS }))
}

async fn products_handler(
    State(state): State<AppState>,
    Query(query): Query<ProductsQuery>,
) -> Response {
    let risk = query.risk.as_deref().unwrap_or(DEFAULT_RISK);
    json_response(StatusCode::OK, state.catalogue.product_catalogue(risk))
}

async fn normalize_handler(body: Bytes) -> Response {
    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unparseable cashflow payload, using zero series");
        Value::Null
    });
    let cashflows = enforce_cashflow_horizon(&cashflows_from_payload(payload));
    json_response(StatusCode::OK, NormalizeResponse { cashflows })
}

async fn analysis_handler(payload: Result<Json<AnalysisRequest>, JsonRejection>) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    json_response(StatusCode::OK, analyze_agent_text(request.response))
}

fn analyze_agent_text(text: String) -> AnalysisResponse {
    let (analysis, error) = match parse_agent_response(&text) {
        Ok(analysis) => {
            log_key_metrics(&analysis);
            (Some(analysis), None)
        }
        Err(e) => {
            let preview: String = text.chars().take(1000).collect();
            tracing::warn!(error = %e, raw = %preview, "could not parse analysis JSON");
            (None, Some(e.to_string()))
        }
    };
    AnalysisResponse {
        response: text,
        analysis,
        status: "completed",
        error,
    }
}

fn cashflows_from_payload(payload: Value) -> Value {
    match payload {
        Value::Object(mut fields) => fields.remove("cashflows").unwrap_or(Value::Null),
        other => other,
    }
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
