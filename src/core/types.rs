use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Last year of the projection horizon.
pub const HORIZON_YEARS: u32 = 25;

/// Report years that every canonical cashflow series carries, in order.
pub const CHECKPOINT_YEARS: [u32; 6] = [0, 5, 10, 15, 20, 25];

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CashflowPoint {
    pub year: u32,
    pub end_assets: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub age: i64,
    pub current_cash: f64,
    pub investment_assets: f64,
    pub yearly_savings_rate: f64,
    pub salary: f64,
    pub portfolio: BTreeMap<String, f64>,
    pub risk_appetite: String,
    pub target_retire_age: i64,
    pub target_monthly_income: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub advisor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRec {
    pub name: String,
    pub allocation: f64,
    #[serde(deserialize_with = "required_nullable")]
    pub exp_return: Option<f64>,
    #[serde(default)]
    pub risk_rating: Option<String>,
    #[serde(default)]
    pub asset_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub monthly_income: f64,
    pub success_rate_pct: f64,
    pub risk_level: String,
    #[serde(default)]
    pub flexibility: Option<String>,
    #[serde(deserialize_with = "required_nullable")]
    pub time_horizon_years: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deltas {
    #[serde(deserialize_with = "required_nullable")]
    pub additional_savings_monthly: Option<f64>,
    /// Baseline sustainable monthly income before the scenario's changes.
    #[serde(default)]
    pub retirement_income_monthly: Option<f64>,
    #[serde(default)]
    pub retirement_income_delta: Option<f64>,
    #[serde(default)]
    pub success_rate_delta_pct: Option<f64>,
    /// May be negative when the scenario shortens the income duration.
    #[serde(default)]
    pub extra_years_income_duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub metrics: Metrics,
    #[serde(default)]
    pub deltas: Option<Deltas>,
    #[serde(default)]
    pub products: Vec<ProductRec>,
    #[serde(default)]
    pub cashflows: Vec<CashflowPoint>,
}

/// Structured scenario analysis returned by the planning agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub scenario: UserProfile,
    pub recommended_changes: Map<String, Value>,
    pub predictions: Predictions,
    pub follow_ups: Vec<String>,
    pub alternatives: Vec<String>,
    pub considerations: String,
}

// The key must be present; only its value may be null.
fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::deserialize(deserializer)
}
