//! Error types shared by the library components.

use thiserror::Error;

/// Errors surfaced by collaborators and registries.
///
/// The poll and scoring loops never propagate these; they are logged and
/// absorbed where they occur.
#[derive(Debug, Error)]
pub enum DeckError {
    #[error("tmux server not running")]
    ServerUnavailable,

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("hotkey slot {0} is out of range (1-10)")]
    InvalidSlot(u8),

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, DeckError>;
