//! In-memory [`Multiplexer`] whose sessions and pane contents are set by
//! the caller. Used to drive the daemon without a tmux server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Multiplexer, Pane, TmuxSession};
use crate::error::{DeckError, Result};

#[derive(Debug, Default)]
struct Script {
    running: bool,
    sessions: Vec<TmuxSession>,
    panes: HashMap<String, Vec<(Pane, String)>>,
    default_content: HashMap<String, String>,
    working_dirs: HashMap<String, String>,
    failing: HashSet<String>,
    sent: Vec<(String, String, bool)>,
    switched: Vec<String>,
}

#[derive(Debug)]
pub struct ScriptedMux {
    script: Mutex<Script>,
}

impl Default for ScriptedMux {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMux {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                running: true,
                ..Script::default()
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_running(&self, running: bool) {
        self.script().running = running;
    }

    pub fn add_session(&self, name: &str, working_dir: Option<&str>) {
        let mut script = self.script();
        if !script.sessions.iter().any(|s| s.name == name) {
            script.sessions.push(TmuxSession::new(name));
        }
        if let Some(dir) = working_dir {
            script.working_dirs.insert(name.to_string(), dir.to_string());
        }
    }

    pub fn remove_session(&self, name: &str) {
        let mut script = self.script();
        script.sessions.retain(|s| s.name != name);
        script.panes.remove(name);
        script.default_content.remove(name);
    }

    /// Set the creation time as seconds since the epoch
    pub fn set_created(&self, name: &str, secs: i64) {
        let created = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default();
        if let Some(session) = self.script().sessions.iter_mut().find(|s| s.name == name) {
            session.created_at = created;
        }
    }

    /// Insert or replace the content of one pane
    pub fn set_pane(&self, session: &str, pane: Pane, content: &str) {
        let mut script = self.script();
        let panes = script.panes.entry(session.to_string()).or_default();
        match panes.iter_mut().find(|(p, _)| same_pane(p, &pane)) {
            Some(entry) => entry.1 = content.to_string(),
            None => panes.push((pane, content.to_string())),
        }
    }

    pub fn set_default_content(&self, session: &str, content: &str) {
        self.script()
            .default_content
            .insert(session.to_string(), content.to_string());
    }

    /// Make every capture in `session` fail
    pub fn fail_captures(&self, session: &str, fail: bool) {
        let mut script = self.script();
        if fail {
            script.failing.insert(session.to_string());
        } else {
            script.failing.remove(session);
        }
    }

    /// `(target, text, submit)` for every `send_keys` call
    pub fn sent_keys(&self) -> Vec<(String, String, bool)> {
        self.script().sent.clone()
    }

    pub fn switched(&self) -> Vec<String> {
        self.script().switched.clone()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.script().running {
            Ok(())
        } else {
            Err(DeckError::ServerUnavailable)
        }
    }

    fn ensure_exists(&self, session: &str) -> Result<()> {
        if self.script().sessions.iter().any(|s| s.name == session) {
            Ok(())
        } else {
            Err(missing(session))
        }
    }
}

fn same_pane(a: &Pane, b: &Pane) -> bool {
    a.window_index == b.window_index && a.pane_index == b.pane_index
}

fn missing(target: &str) -> DeckError {
    DeckError::Command {
        command: format!("tmux -t {target}"),
        stderr: format!("can't find session: {target}"),
    }
}

#[async_trait]
impl Multiplexer for ScriptedMux {
    async fn is_running(&self) -> bool {
        self.script().running
    }

    async fn list_sessions(&self) -> Result<Vec<TmuxSession>> {
        self.ensure_running()?;
        Ok(self.script().sessions.clone())
    }

    async fn list_panes(&self, session: &str) -> Result<Vec<Pane>> {
        self.ensure_running()?;
        self.ensure_exists(session)?;
        Ok(self
            .script()
            .panes
            .get(session)
            .map(|panes| panes.iter().map(|(pane, _)| *pane).collect())
            .unwrap_or_default())
    }

    async fn capture_pane(&self, session: &str, pane: &Pane) -> Result<String> {
        self.ensure_running()?;
        let script = self.script();
        if script.failing.contains(session) {
            return Err(missing(&pane.target(session)));
        }
        script
            .panes
            .get(session)
            .and_then(|panes| panes.iter().find(|(p, _)| same_pane(p, pane)))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| missing(&pane.target(session)))
    }

    async fn capture_default_pane(&self, session: &str) -> Result<String> {
        self.ensure_running()?;
        let script = self.script();
        if script.failing.contains(session) {
            return Err(missing(session));
        }
        Ok(script
            .default_content
            .get(session)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_keys(&self, target: &str, text: &str, submit: bool) -> Result<()> {
        self.ensure_running()?;
        self.script()
            .sent
            .push((target.to_string(), text.to_string(), submit));
        Ok(())
    }

    async fn switch_client(&self, target: &str) -> Result<()> {
        self.ensure_running()?;
        self.script().switched.push(target.to_string());
        Ok(())
    }

    async fn new_session(&self, name: &str, working_dir: Option<&str>) -> Result<()> {
        self.ensure_running()?;
        self.add_session(name, working_dir);
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.ensure_running()?;
        self.ensure_exists(name)?;
        self.remove_session(name);
        Ok(())
    }

    async fn rename_session(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.ensure_running()?;
        self.ensure_exists(old_name)?;
        let mut script = self.script();
        for session in script.sessions.iter_mut().filter(|s| s.name == old_name) {
            session.name = new_name.to_string();
        }
        if let Some(panes) = script.panes.remove(old_name) {
            script.panes.insert(new_name.to_string(), panes);
        }
        if let Some(dir) = script.working_dirs.remove(old_name) {
            script.working_dirs.insert(new_name.to_string(), dir);
        }
        Ok(())
    }

    async fn working_directory(&self, session: &str) -> Result<String> {
        self.ensure_running()?;
        self.ensure_exists(session)?;
        Ok(self
            .script()
            .working_dirs
            .get(session)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server() {
        let mux = ScriptedMux::new();
        mux.set_running(false);
        assert!(!mux.is_running().await);
        assert!(matches!(
            mux.list_sessions().await,
            Err(DeckError::ServerUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_rename_moves_panes() {
        let mux = ScriptedMux::new();
        mux.add_session("old", Some("/tmp/app"));
        mux.set_pane("old", Pane::new(0, 0), "❯ ");
        mux.rename_session("old", "new").await.unwrap();

        assert_eq!(mux.list_panes("new").await.unwrap(), vec![Pane::new(0, 0)]);
        assert_eq!(mux.working_directory("new").await.unwrap(), "/tmp/app");
        assert!(mux.list_panes("old").await.is_err());
    }
}
