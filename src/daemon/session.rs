use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::tmux::{AgentMode, AgentStatus, Pane, PaneInfo};
use crate::usage::SessionUsage;

/// Snapshot of one monitored session.
///
/// The daemon hands out clones of these; nothing outside the daemon ever
/// holds a reference into its tracking map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub name: String,
    pub status: AgentStatus,
    pub last_content: String,
    pub last_capture: DateTime<Utc>,
    pub tokens: u64,
    pub thinking_time: Duration,
    pub last_line: String,
    pub mode: Option<AgentMode>,
    pub created_at: DateTime<Utc>,
    pub attached: bool,
    /// Pane the agent was last found in; `None` when tracked via the
    /// session's default pane
    pub pane: Option<Pane>,
    pub working_dir: Option<String>,
    /// Transcript bound at discovery. Never reassigned afterwards.
    pub transcript_id: Option<String>,
    pub usage: Option<SessionUsage>,
}

impl SessionState {
    pub(crate) fn apply_capture(&mut self, content: String, info: PaneInfo, at: DateTime<Utc>) {
        self.status = info.status;
        self.tokens = info.tokens;
        self.thinking_time = info.thinking_time;
        self.last_line = info.last_line;
        self.mode = info.mode;
        self.last_content = content;
        self.last_capture = at;
    }
}
