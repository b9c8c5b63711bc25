use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::horizon::enforce_cashflow_horizon;
use super::types::{AnalysisOutput, CashflowPoint, UserProfile};

const CONSIDERATIONS_PREVIEW_CHARS: usize = 200;
const PRODUCTS_PREVIEW: usize = 5;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("agent response contains no JSON: {0}")]
    NoJson(#[source] serde_json::Error),
    #[error("JSON formatting error at line {line}, column {column}: {source}")]
    Malformed {
        line: usize,
        column: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("analysis payload is not a JSON object")]
    NotAnObject,
    #[error("analysis does not match the expected schema: {0}")]
    Schema(#[source] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Extracts the analysis JSON from free-form agent output and validates it,
/// normalizing `predictions.cashflows` on the way.
pub fn parse_agent_response(text: &str) -> Result<AnalysisOutput, AnalysisError> {
    prepare_analysis(extract_analysis_json(text)?)
}

pub fn extract_analysis_json(text: &str) -> Result<Value, AnalysisError> {
    let text = text.trim();
    let span = text
        .find('{')
        .zip(text.rfind('}'))
        .filter(|(start, end)| end > start);

    match span {
        Some((start, end)) => {
            let cleaned = text[start..=end]
                .replace(",\n}", "\n}")
                .replace(",\n]", "\n]")
                .replace(", }", " }")
                .replace(", ]", " ]");
            serde_json::from_str(&cleaned).map_err(|source| AnalysisError::Malformed {
                line: source.line(),
                column: source.column(),
                source,
            })
        }
        None => {
            let cleaned = text.replace(",\n}", "\n}").replace(",\n]", "\n]");
            serde_json::from_str(&cleaned).map_err(AnalysisError::NoJson)
        }
    }
}

/// Replaces `predictions.cashflows` with its canonical six-point series.
///
/// Non-object payloads are left alone, as is a `predictions` value that is not
/// an object; schema validation rejects both later.
pub fn enforce_analysis_cashflows(analysis: &mut Value) {
    let Some(fields) = analysis.as_object_mut() else {
        return;
    };
    let predictions = fields
        .entry("predictions")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(predictions) = predictions.as_object_mut() else {
        tracing::warn!("cashflow enforcement skipped: predictions is not an object");
        return;
    };

    let raw = match predictions.get("cashflows") {
        Some(Value::Null) | None => Value::Array(Vec::new()),
        Some(raw) => raw.clone(),
    };
    let canonical = enforce_cashflow_horizon(&raw);
    match serde_json::to_value(canonical) {
        Ok(value) => {
            predictions.insert("cashflows".to_string(), value);
        }
        Err(e) => tracing::warn!(error = %e, "cashflow enforcement failed"),
    }
}

pub fn prepare_analysis(mut analysis: Value) -> Result<AnalysisOutput, AnalysisError> {
    if !analysis.is_object() {
        return Err(AnalysisError::NotAnObject);
    }
    enforce_analysis_cashflows(&mut analysis);
    let output: AnalysisOutput = serde_json::from_value(analysis).map_err(AnalysisError::Schema)?;
    validate_analysis(&output).map_err(AnalysisError::Invalid)?;
    Ok(output)
}

pub fn validate_analysis(analysis: &AnalysisOutput) -> Result<(), String> {
    validate_profile(&analysis.scenario, "scenario")?;

    let predictions = &analysis.predictions;
    let metrics = &predictions.metrics;
    at_least(
        "predictions.metrics.monthly_income",
        metrics.monthly_income,
        0.0,
    )?;
    within(
        "predictions.metrics.success_rate_pct",
        metrics.success_rate_pct,
        0.0,
        100.0,
    )?;
    if let Some(years) = metrics.time_horizon_years {
        if years < 0 {
            return Err("predictions.metrics.time_horizon_years must be >= 0".to_string());
        }
    }

    if let Some(deltas) = &predictions.deltas {
        if let Some(v) = deltas.additional_savings_monthly {
            at_least("predictions.deltas.additional_savings_monthly", v, 0.0)?;
        }
        if let Some(v) = deltas.retirement_income_monthly {
            at_least("predictions.deltas.retirement_income_monthly", v, 0.0)?;
        }
        for (name, value) in [
            (
                "predictions.deltas.retirement_income_delta",
                deltas.retirement_income_delta,
            ),
            (
                "predictions.deltas.success_rate_delta_pct",
                deltas.success_rate_delta_pct,
            ),
            (
                "predictions.deltas.extra_years_income_duration",
                deltas.extra_years_income_duration,
            ),
        ] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(format!("{name} must be a finite number"));
            }
        }
    }

    for (idx, product) in predictions.products.iter().enumerate() {
        within(
            &format!("predictions.products[{idx}].allocation"),
            product.allocation,
            0.0,
            1.0,
        )?;
        if let Some(v) = product.exp_return {
            within(&format!("predictions.products[{idx}].exp_return"), v, 0.0, 1.0)?;
        }
    }

    for (idx, point) in predictions.cashflows.iter().enumerate() {
        at_least(
            &format!("predictions.cashflows[{idx}].end_assets"),
            point.end_assets,
            0.0,
        )?;
    }

    Ok(())
}

pub fn validate_profile(profile: &UserProfile, prefix: &str) -> Result<(), String> {
    if profile.age <= 0 {
        return Err(format!("{prefix}.age must be > 0"));
    }
    if profile.target_retire_age <= 0 {
        return Err(format!("{prefix}.target_retire_age must be > 0"));
    }
    at_least(
        &format!("{prefix}.current_cash"),
        profile.current_cash,
        0.0,
    )?;
    at_least(
        &format!("{prefix}.investment_assets"),
        profile.investment_assets,
        0.0,
    )?;
    within(
        &format!("{prefix}.yearly_savings_rate"),
        profile.yearly_savings_rate,
        0.0,
        1.0,
    )?;
    at_least(&format!("{prefix}.salary"), profile.salary, 0.0)?;
    if !profile.target_monthly_income.is_finite() || profile.target_monthly_income <= 0.0 {
        return Err(format!("{prefix}.target_monthly_income must be > 0"));
    }
    Ok(())
}

fn at_least(name: &str, value: f64, min: f64) -> Result<(), String> {
    if !value.is_finite() || value < min {
        return Err(format!("{name} must be >= {min}"));
    }
    Ok(())
}

fn within(name: &str, value: f64, min: f64, max: f64) -> Result<(), String> {
    if !(min..=max).contains(&value) {
        return Err(format!("{name} must be between {min} and {max}"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLine {
    pub name: String,
    pub allocation_pct: f64,
    pub exp_return_pct: Option<f64>,
    pub risk_rating: Option<String>,
}

/// Operational snapshot of a validated analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub scenario_id: String,
    pub scenario_name: String,
    pub age: i64,
    pub target_monthly_income: f64,
    pub monthly_income: f64,
    pub success_rate_pct: f64,
    pub risk_level: String,
    pub flexibility: Option<String>,
    pub time_horizon_years: Option<i64>,
    pub baseline_monthly_income: Option<f64>,
    pub income_vs_target: Option<f64>,
    pub success_rate_delta_pct: Option<f64>,
    pub extra_years_income_duration: Option<f64>,
    pub additional_savings_monthly: Option<f64>,
    pub products: Vec<ProductLine>,
    pub omitted_products: usize,
    pub trajectory_start: Option<CashflowPoint>,
    pub trajectory_end: Option<CashflowPoint>,
    pub depletion_year: Option<u32>,
    pub considerations: String,
}

impl From<&AnalysisOutput> for AnalysisSummary {
    fn from(analysis: &AnalysisOutput) -> Self {
        let scenario = &analysis.scenario;
        let predictions = &analysis.predictions;
        let metrics = &predictions.metrics;
        let deltas = predictions.deltas.clone().unwrap_or_default();

        let products = predictions
            .products
            .iter()
            .take(PRODUCTS_PREVIEW)
            .map(|p| ProductLine {
                name: p.name.clone(),
                allocation_pct: p.allocation * 100.0,
                exp_return_pct: p.exp_return.map(|r| r * 100.0),
                risk_rating: p.risk_rating.clone(),
            })
            .collect();

        Self {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            age: scenario.age,
            target_monthly_income: scenario.target_monthly_income,
            monthly_income: metrics.monthly_income,
            success_rate_pct: metrics.success_rate_pct,
            risk_level: metrics.risk_level.clone(),
            flexibility: metrics.flexibility.clone(),
            time_horizon_years: metrics.time_horizon_years,
            baseline_monthly_income: deltas.retirement_income_monthly,
            income_vs_target: deltas.retirement_income_delta,
            success_rate_delta_pct: deltas.success_rate_delta_pct,
            extra_years_income_duration: deltas.extra_years_income_duration,
            additional_savings_monthly: deltas.additional_savings_monthly,
            products,
            omitted_products: predictions.products.len().saturating_sub(PRODUCTS_PREVIEW),
            trajectory_start: predictions.cashflows.first().copied(),
            trajectory_end: predictions.cashflows.last().copied(),
            depletion_year: depletion_year(&predictions.cashflows),
            considerations: preview(&analysis.considerations, CONSIDERATIONS_PREVIEW_CHARS),
        }
    }
}

/// First checkpoint at which the series has run out of assets.
pub fn depletion_year(cashflows: &[CashflowPoint]) -> Option<u32> {
    cashflows
        .iter()
        .find(|p| p.end_assets <= 0.0)
        .map(|p| p.year)
}

pub fn log_key_metrics(analysis: &AnalysisOutput) {
    let summary = AnalysisSummary::from(analysis);
    tracing::info!(
        scenario_id = %summary.scenario_id,
        scenario = %summary.scenario_name,
        age = summary.age,
        target_monthly_income = summary.target_monthly_income,
        monthly_income = summary.monthly_income,
        success_rate_pct = summary.success_rate_pct,
        risk_level = %summary.risk_level,
        time_horizon_years = ?summary.time_horizon_years,
        "retirement scenario metrics"
    );
    if summary.baseline_monthly_income.is_some()
        || summary.income_vs_target.is_some()
        || summary.success_rate_delta_pct.is_some()
    {
        tracing::info!(
            baseline_monthly_income = ?summary.baseline_monthly_income,
            income_vs_target = ?summary.income_vs_target,
            success_rate_delta_pct = ?summary.success_rate_delta_pct,
            extra_years_income_duration = ?summary.extra_years_income_duration,
            additional_savings_monthly = ?summary.additional_savings_monthly,
            "scenario deltas"
        );
    }
    for product in &summary.products {
        tracing::info!(
            product = %product.name,
            allocation_pct = product.allocation_pct,
            exp_return_pct = ?product.exp_return_pct,
            risk_rating = ?product.risk_rating,
            "product recommendation"
        );
    }
    if summary.omitted_products > 0 {
        tracing::info!(count = summary.omitted_products, "more products omitted");
    }
    if let (Some(start), Some(end)) = (summary.trajectory_start, summary.trajectory_end) {
        tracing::info!(
            start_year = start.year,
            start_assets = start.end_assets,
            end_year = end.year,
            end_assets = end.end_assets,
            depletion_year = ?summary.depletion_year,
            "asset trajectory"
        );
    }
    tracing::debug!(considerations = %summary.considerations, "scenario considerations");
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
