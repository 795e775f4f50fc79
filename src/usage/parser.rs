use chrono::Utc;
use serde::Deserialize;
use std::path::Path;

use super::{estimate_cost, SessionUsage, TokenUsage};
use crate::error::{DeckError, Result};

/// The parts of a transcript record that carry usage
#[derive(Debug, Deserialize)]
struct TranscriptRecord {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Option<RecordMessage>,
}

#[derive(Debug, Deserialize)]
struct RecordMessage {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

/// Accumulate usage from transcript text.
///
/// Only assistant records count. Lines that are not valid JSON (including a
/// half-written trailing line) are skipped.
pub fn parse_transcript_str(transcript_id: &str, project_dir: &Path, content: &str) -> SessionUsage {
    let mut totals = TokenUsage::default();
    let mut model = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<TranscriptRecord>(line) else {
            continue;
        };
        if record.kind != "assistant" {
            continue;
        }
        let Some(message) = record.message else {
            continue;
        };
        if let Some(usage) = message.usage {
            totals += usage;
        }
        if let Some(m) = message.model.filter(|m| !m.is_empty()) {
            model = Some(m);
        }
    }

    SessionUsage {
        transcript_id: transcript_id.to_string(),
        project_dir: project_dir.to_path_buf(),
        estimated_cost: estimate_cost(&totals, model.as_deref()),
        totals,
        model,
        last_updated: Utc::now(),
    }
}

/// Parse a transcript file; the identifier is the file stem.
pub async fn parse_transcript(path: &Path) -> Result<SessionUsage> {
    let bytes = tokio::fs::read(path).await.map_err(|source| DeckError::Io {
        context: format!("reading transcript {}", path.display()),
        source,
    })?;
    let content = String::from_utf8_lossy(&bytes);

    let transcript_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let project_dir = path.parent().unwrap_or_else(|| Path::new(""));

    Ok(parse_transcript_str(&transcript_id, project_dir, &content))
}
