use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use super::{Multiplexer, Pane, TmuxSession};
use crate::error::{DeckError, Result};

/// Lines of scrollback included in each capture
const CAPTURE_HISTORY: &str = "-50";

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let command = format!("tmux {}", args.first().copied().unwrap_or_default());
        Command::new(&self.tmux_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| DeckError::Spawn { command, source })
    }

    /// Run a tmux command and return stdout, mapping failures to errors
    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("no server running") || stderr.contains("error connecting") {
                return Err(DeckError::ServerUnavailable);
            }
            return Err(DeckError::Command {
                command: format!("tmux {}", args.first().copied().unwrap_or_default()),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn capture(&self, target: &str) -> Result<String> {
        self.run_checked(&["capture-pane", "-e", "-p", "-t", target, "-S", CAPTURE_HISTORY])
            .await
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn is_running(&self) -> bool {
        Command::new(&self.tmux_path)
            .arg("list-sessions")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn list_sessions(&self) -> Result<Vec<TmuxSession>> {
        // Format: session_name|session_created|session_attached
        let stdout = self
            .run_checked(&[
                "list-sessions",
                "-F",
                "#{session_name}|#{session_created}|#{session_attached}",
            ])
            .await?;

        Ok(stdout.lines().filter_map(parse_session_line).collect())
    }

    async fn list_panes(&self, session: &str) -> Result<Vec<Pane>> {
        let stdout = self
            .run_checked(&[
                "list-panes",
                "-s",
                "-t",
                session,
                "-F",
                "#{window_index}|#{pane_index}|#{pane_active}",
            ])
            .await?;

        Ok(stdout.lines().filter_map(parse_pane_line).collect())
    }

    async fn capture_pane(&self, session: &str, pane: &Pane) -> Result<String> {
        self.capture(&pane.target(session)).await
    }

    async fn capture_default_pane(&self, session: &str) -> Result<String> {
        self.capture(&format!("{}:", session)).await
    }

    async fn send_keys(&self, target: &str, text: &str, submit: bool) -> Result<()> {
        self.run_checked(&["send-keys", "-t", target, "-l", text])
            .await?;
        if !submit {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        self.run_checked(&["send-keys", "-t", target, "Enter"]).await?;

        // Multi-line pastes need a second Enter to leave paste mode
        if text.contains('\n') {
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.run_checked(&["send-keys", "-t", target, "Enter"]).await?;
        }
        Ok(())
    }

    async fn switch_client(&self, target: &str) -> Result<()> {
        self.run_checked(&["switch-client", "-t", target]).await?;
        Ok(())
    }

    async fn new_session(&self, name: &str, working_dir: Option<&str>) -> Result<()> {
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(dir) = working_dir {
            args.extend(["-c", dir]);
        }
        self.run_checked(&args).await?;
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.run_checked(&["kill-session", "-t", name]).await?;
        Ok(())
    }

    async fn rename_session(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.run_checked(&["rename-session", "-t", old_name, new_name])
            .await?;
        Ok(())
    }

    async fn working_directory(&self, session: &str) -> Result<String> {
        let stdout = self
            .run_checked(&["display-message", "-p", "-t", session, "#{pane_current_path}"])
            .await?;
        Ok(stdout.trim().to_string())
    }
}

fn parse_session_line(line: &str) -> Option<TmuxSession> {
    // Session names may contain '|', so split from the right
    let mut parts = line.rsplitn(3, '|');
    let attached = parts.next()?;
    let created = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() {
        return None;
    }

    let created_at = created
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_default();

    Some(TmuxSession {
        name: name.to_string(),
        created_at,
        attached: attached.trim().parse::<u32>().unwrap_or(0) > 0,
    })
}

fn parse_pane_line(line: &str) -> Option<Pane> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 3 {
        return None;
    }

    Some(Pane {
        window_index: parts[0].parse().ok()?,
        pane_index: parts[1].parse().ok()?,
        active: parts[2].trim() == "1",
    })
}
