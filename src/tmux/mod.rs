mod client;
mod heuristics;
mod scripted;

pub use client::TmuxClient;
pub use heuristics::{strip_escapes, AgentMode, AgentStatus, Classifier, PaneInfo};
pub use scripted::ScriptedMux;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A live tmux session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSession {
    /// Session name
    pub name: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Whether any client is attached
    pub attached: bool,
}

impl TmuxSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: DateTime::<Utc>::default(),
            attached: false,
        }
    }
}

/// Location of a pane inside its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pane {
    pub window_index: u32,
    pub pane_index: u32,
    pub active: bool,
}

impl Pane {
    pub fn new(window_index: u32, pane_index: u32) -> Self {
        Self {
            window_index,
            pane_index,
            active: false,
        }
    }

    /// tmux target string (`session:window.pane`)
    pub fn target(&self, session: &str) -> String {
        format!("{}:{}.{}", session, self.window_index, self.pane_index)
    }
}

/// Operations the daemon needs from the terminal multiplexer
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Whether the server is reachable at all
    async fn is_running(&self) -> bool;

    async fn list_sessions(&self) -> Result<Vec<TmuxSession>>;

    async fn list_panes(&self, session: &str) -> Result<Vec<Pane>>;

    /// Raw pane text, escape sequences included
    async fn capture_pane(&self, session: &str, pane: &Pane) -> Result<String>;

    /// Raw text of the session's current pane
    async fn capture_default_pane(&self, session: &str) -> Result<String>;

    /// Type `text` into `target`; `submit` presses Enter afterwards
    async fn send_keys(&self, target: &str, text: &str, submit: bool) -> Result<()>;

    async fn switch_client(&self, target: &str) -> Result<()>;

    async fn new_session(&self, name: &str, working_dir: Option<&str>) -> Result<()>;

    async fn kill_session(&self, name: &str) -> Result<()>;

    async fn rename_session(&self, old_name: &str, new_name: &str) -> Result<()>;

    async fn working_directory(&self, session: &str) -> Result<String>;
}
