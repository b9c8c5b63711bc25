mod analysis;
mod catalogue;
mod horizon;
mod types;

pub use analysis::{
    AnalysisError, AnalysisSummary, ProductLine, depletion_year, enforce_analysis_cashflows,
    extract_analysis_json, log_key_metrics, parse_agent_response, prepare_analysis,
    validate_analysis,
};
pub use catalogue::{Catalogue, CatalogueError, QUICK_SCENARIOS};
pub use horizon::{enforce_cashflow_horizon, normalize_points, zero_series};
pub use types::{
    AnalysisOutput, CHECKPOINT_YEARS, CashflowPoint, Deltas, HORIZON_YEARS, Metrics, Predictions,
    ProductRec, UserProfile,
};
