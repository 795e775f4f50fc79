use serde::{Deserialize, Serialize};

use super::TokenUsage;

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl ModelTier {
    /// Map a raw model identifier to its tier by substring; unknown models
    /// are priced as the mid tier.
    pub fn from_model(model: &str) -> Self {
        let model = model.to_lowercase();
        if model.contains("opus") {
            ModelTier::Opus
        } else if model.contains("sonnet") {
            ModelTier::Sonnet
        } else if model.contains("haiku") {
            ModelTier::Haiku
        } else {
            ModelTier::default()
        }
    }

    pub fn pricing(&self) -> ModelPricing {
        match self {
            ModelTier::Opus => ModelPricing {
                input: 15.0,
                output: 75.0,
                cache_write: 18.75,
                cache_read: 1.50,
            },
            ModelTier::Sonnet => ModelPricing {
                input: 3.0,
                output: 15.0,
                cache_write: 3.75,
                cache_read: 0.30,
            },
            ModelTier::Haiku => ModelPricing {
                input: 0.80,
                output: 4.0,
                cache_write: 1.0,
                cache_read: 0.08,
            },
        }
    }
}

/// Estimated USD cost of `usage` at `model`'s tier
pub fn estimate_cost(usage: &TokenUsage, model: Option<&str>) -> f64 {
    let pricing = model.map(ModelTier::from_model).unwrap_or_default().pricing();
    let per_million = |tokens: u64| tokens as f64 / 1_000_000.0;

    per_million(usage.input) * pricing.input
        + per_million(usage.output) * pricing.output
        + per_million(usage.cache_write) * pricing.cache_write
        + per_million(usage.cache_read) * pricing.cache_read
}
