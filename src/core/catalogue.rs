use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use thiserror::Error;

use super::analysis::validate_profile;
use super::types::UserProfile;

pub const USER_PROFILES_FILE: &str = "user_profiles.json";
pub const INVESTMENT_PRODUCTS_FILE: &str = "investment_products.json";
const DEFAULT_RISK: &str = "medium";

pub const QUICK_SCENARIOS: [&str; 10] = [
    "What if I retire 2 years earlier?",
    "How would a market crash affect my plan?",
    "Should I increase my savings rate by 5%?",
    "What if I need $100k for healthcare costs?",
    "How does inflation impact my retirement income?",
    "What if I work part-time in retirement?",
    "Should I pay off my mortgage before retiring?",
    "What if I inherit $200k from my parents?",
    "How would changing jobs affect my retirement?",
    "What if I want to retire abroad?",
];

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid profile in {path}: {reason}")]
    InvalidProfile { path: PathBuf, reason: String },
}

/// Reference data the planning prompts are enriched with.
#[derive(Debug, Clone)]
pub struct Catalogue {
    pub profiles: Vec<UserProfile>,
    pub products: Value,
}

impl Default for Catalogue {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            products: empty_products(),
        }
    }
}

impl Catalogue {
    /// Loads both data files from `data_dir`. A missing or unreadable file is
    /// logged and replaced with its empty default.
    pub fn load(data_dir: &Path) -> Self {
        let profiles = match read_user_profiles(data_dir) {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::warn!(error = %e, "error loading user profiles");
                Vec::new()
            }
        };
        let products = match read_investment_products(data_dir) {
            Ok(products) => products,
            Err(e) => {
                tracing::warn!(error = %e, "error loading investment products");
                empty_products()
            }
        };
        tracing::info!(
            data_dir = %data_dir.display(),
            profiles = profiles.len(),
            "catalogue loaded"
        );
        Self { profiles, products }
    }

    pub fn profile(&self, id: &str) -> Option<&UserProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Products for a risk level, falling back to the medium tier.
    pub fn product_catalogue(&self, risk: &str) -> Value {
        let by_risk = self.products.get("products_by_risk");
        let products = by_risk
            .and_then(|tiers| tiers.get(risk))
            .or_else(|| by_risk.and_then(|tiers| tiers.get(DEFAULT_RISK)))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        json!({ "products": products })
    }
}

pub fn read_user_profiles(data_dir: &Path) -> Result<Vec<UserProfile>, CatalogueError> {
    let path = data_dir.join(USER_PROFILES_FILE);
    let profiles: Vec<UserProfile> = read_json(&path)?;
    for profile in &profiles {
        validate_profile(profile, &format!("profile {}", profile.id)).map_err(|reason| {
            CatalogueError::InvalidProfile {
                path: path.clone(),
                reason,
            }
        })?;
    }
    Ok(profiles)
}

pub fn read_investment_products(data_dir: &Path) -> Result<Value, CatalogueError> {
    read_json(&data_dir.join(INVESTMENT_PRODUCTS_FILE))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CatalogueError> {
    let raw = fs::read_to_string(path).map_err(|source| CatalogueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CatalogueError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn empty_products() -> Value {
    json!({ "low": [], "medium": [], "high": [] })
}
