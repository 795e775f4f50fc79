//! Token usage accounting from append-only session transcripts.

mod ledger;
mod parser;
mod pricing;

pub use ledger::{encode_project_dir, UsageLedger};
pub use parser::{parse_transcript, parse_transcript_str};
pub use pricing::{estimate_cost, ModelPricing, ModelTier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::ops::{Add, AddAssign};
use std::path::PathBuf;

/// Token counters as reported per assistant message.
///
/// Field names follow the transcript's `usage` object so records can be
/// deserialized straight into this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    #[serde(rename = "input_tokens", deserialize_with = "null_as_zero")]
    pub input: u64,
    #[serde(rename = "output_tokens", deserialize_with = "null_as_zero")]
    pub output: u64,
    #[serde(rename = "cache_creation_input_tokens", deserialize_with = "null_as_zero")]
    pub cache_write: u64,
    #[serde(rename = "cache_read_input_tokens", deserialize_with = "null_as_zero")]
    pub cache_read: u64,
}

/// Transcripts sometimes write `null` for a counter they did not fill in
fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

impl TokenUsage {
    pub fn new(input: u64, output: u64, cache_write: u64, cache_read: u64) -> Self {
        Self {
            input,
            output,
            cache_write,
            cache_read,
        }
    }

    /// Componentwise sum.
    pub fn combine(self, other: Self) -> Self {
        Self {
            input: self.input.saturating_add(other.input),
            output: self.output.saturating_add(other.output),
            cache_write: self.cache_write.saturating_add(other.cache_write),
            cache_read: self.cache_read.saturating_add(other.cache_read),
        }
    }

    /// Direct input plus both cache counters.
    pub fn total_input(&self) -> u64 {
        self.input
            .saturating_add(self.cache_write)
            .saturating_add(self.cache_read)
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        self.combine(rhs)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.combine(rhs);
    }
}

/// Accumulated usage for one transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub transcript_id: String,
    pub project_dir: PathBuf,
    pub totals: TokenUsage,
    /// Most recent model identifier seen in the transcript
    pub model: Option<String>,
    pub estimated_cost: f64,
    pub last_updated: DateTime<Utc>,
}
