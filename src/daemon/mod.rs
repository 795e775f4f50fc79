//! Poll loop that discovers agent panes, classifies them and emits events.

mod events;
mod session;

pub use events::{event_queue, Event, EventKind, EventReceiver, EventSender};
pub use session::SessionState;

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::store::SessionStore;
use crate::tmux::{AgentStatus, Classifier, Multiplexer, Pane, PaneInfo, TmuxSession};
use crate::usage::UsageLedger;

/// Discovers, tracks and retires agent sessions.
///
/// The tracking map is owned here and mutated only by the poll cycle.
/// Readers get cloned [`SessionState`] snapshots.
pub struct PollDaemon {
    mux: Arc<dyn Multiplexer>,
    store: Option<Arc<dyn SessionStore>>,
    classifier: Classifier,
    ledger: Arc<UsageLedger>,
    sessions: RwLock<HashMap<String, SessionState>>,
    events: EventSender,
    config: MonitorConfig,
}

impl PollDaemon {
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        ledger: Arc<UsageLedger>,
        events: EventSender,
        config: MonitorConfig,
    ) -> Self {
        Self {
            mux,
            store: None,
            classifier: Classifier::new(),
            ledger,
            sessions: RwLock::new(HashMap::new()),
            events,
            config,
        }
    }

    /// Persist transcript locks and session rows through `store`
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionState>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionState>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// All tracked sessions, oldest first
    pub fn sessions(&self) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = self.read().values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        sessions
    }

    pub fn session(&self, name: &str) -> Option<SessionState> {
        self.read().get(name).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.read().len()
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Poll until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// A cycle already in progress runs to completion; no new cycle starts
    /// after the signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let poll_every = self.config.poll_interval();
        let usage_every = self.config.usage_interval();
        info!(?poll_every, ?usage_every, "poll loop started");

        let mut poll_tick = interval(poll_every);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut usage_tick = interval_at(Instant::now() + usage_every, usage_every);
        usage_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = poll_tick.tick() => self.poll_once().await,
                _ = usage_tick.tick() => self.refresh_usage().await,
            }
        }

        info!("poll loop stopped");
    }

    /// One discovery/classification cycle.
    pub async fn poll_once(&self) {
        if !self.mux.is_running().await {
            self.debug_event("tmux not running".to_string());
            return;
        }

        let live = match self.mux.list_sessions().await {
            Ok(live) => live,
            Err(e) => {
                self.debug_event(format!("list sessions failed: {e}"));
                return;
            }
        };
        self.debug_event(format!("poll: {} tmux sessions", live.len()));

        let now = Utc::now();
        let mut seen = HashSet::with_capacity(live.len());
        for tmux_session in &live {
            seen.insert(tmux_session.name.as_str());
            self.observe(tmux_session, now).await;
        }

        self.retire_missing(&seen, now);
    }

    /// Pull fresh usage for every tracked session from its locked transcript
    pub async fn refresh_usage(&self) {
        let updated: Vec<_> = self
            .ledger
            .refresh()
            .await
            .into_iter()
            .filter_map(|name| self.ledger.usage(&name).map(|usage| (name, usage)))
            .collect();
        if updated.is_empty() {
            return;
        }

        let mut sessions = self.write();
        for (name, usage) in updated {
            if let Some(state) = sessions.get_mut(&name) {
                debug!(session = %name, cost = usage.estimated_cost, "usage updated");
                state.usage = Some(usage);
            }
        }
    }

    async fn observe(&self, tmux_session: &TmuxSession, now: DateTime<Utc>) {
        let name = tmux_session.name.as_str();
        let (tracked, known_pane) = match self.read().get(name) {
            Some(state) => (true, state.pane),
            None => (false, None),
        };

        let Some((pane, content)) = self.locate(name, known_pane).await else {
            return;
        };
        let info = self.classifier.extract_info(&content);

        if tracked {
            self.update(tmux_session, pane, content, info, now);
        } else {
            self.discover(tmux_session, pane, content, info, now).await;
        }
    }

    /// Find the agent's pane: the last known one if it still looks like an
    /// agent, otherwise a scan of every pane, otherwise the default pane.
    async fn locate(&self, session: &str, known: Option<Pane>) -> Option<(Option<Pane>, String)> {
        if let Some(pane) = known {
            match self.mux.capture_pane(session, &pane).await {
                Ok(content) if self.classifier.is_monitorable(&content) => {
                    return Some((Some(pane), content));
                }
                Ok(_) => debug!(session, target = %pane.target(session), "agent left pane, rescanning"),
                Err(e) => debug!(session, "capture of known pane failed: {e}"),
            }
        }

        if let Some((pane, content)) = self.scan_panes(session).await {
            return Some((Some(pane), content));
        }

        match self.mux.capture_default_pane(session).await {
            Ok(content) if self.classifier.is_monitorable(&content) => Some((None, content)),
            Ok(_) => None,
            Err(e) => {
                self.debug_event(format!("{session}: capture error: {e}"));
                None
            }
        }
    }

    async fn scan_panes(&self, session: &str) -> Option<(Pane, String)> {
        let panes = match self.mux.list_panes(session).await {
            Ok(panes) => panes,
            Err(e) => {
                self.debug_event(format!("{session}: list panes error: {e}"));
                return None;
            }
        };

        for pane in panes {
            match self.mux.capture_pane(session, &pane).await {
                Ok(content) if self.classifier.is_monitorable(&content) => {
                    return Some((pane, content));
                }
                Ok(_) => {}
                Err(e) => debug!(session, target = %pane.target(session), "capture failed: {e}"),
            }
        }
        None
    }

    async fn discover(
        &self,
        tmux_session: &TmuxSession,
        pane: Option<Pane>,
        content: String,
        info: PaneInfo,
        now: DateTime<Utc>,
    ) {
        let name = tmux_session.name.as_str();
        let working_dir = match self.mux.working_directory(name).await {
            Ok(dir) if !dir.is_empty() => Some(dir),
            Ok(_) => None,
            Err(e) => {
                debug!(session = name, "working directory unavailable: {e}");
                None
            }
        };

        let transcript_id = self.bind_transcript(name, working_dir.as_deref()).await;
        let usage = match (&working_dir, &transcript_id) {
            (Some(dir), Some(id)) if self.ledger.watch(name, dir, id) => {
                self.ledger.refresh_session(name).await
            }
            _ => None,
        };

        let status = info.status;
        let state = SessionState {
            name: name.to_string(),
            status,
            last_content: content,
            last_capture: now,
            tokens: info.tokens,
            thinking_time: info.thinking_time,
            last_line: info.last_line,
            mode: info.mode,
            created_at: tmux_session.created_at,
            attached: tmux_session.attached,
            pane,
            working_dir,
            transcript_id,
            usage,
        };
        self.write().insert(name.to_string(), state);

        info!(session = name, %status, "session discovered");
        self.events.push(Event::discovered(name, status).with_time(now));
    }

    /// Transcript identity for a newly discovered session: the persisted
    /// lock if there is one, otherwise the newest transcript for its
    /// working directory, which is then persisted.
    async fn bind_transcript(&self, session: &str, working_dir: Option<&str>) -> Option<String> {
        if let Some(store) = &self.store {
            if let Err(e) = store.create_session(session) {
                warn!(session, "failed to record session: {e}");
            }
            match store.locked_transcript(session) {
                Ok(Some(id)) => return Some(id),
                Ok(None) => {}
                Err(e) => warn!(session, "failed to read transcript lock: {e}"),
            }
        }

        let working_dir = working_dir?;
        let Some(id) = self.ledger.find_latest_transcript(working_dir).await else {
            debug!(session, working_dir, "no transcript found");
            return None;
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.lock_transcript(session, &id) {
                warn!(session, "failed to persist transcript lock: {e}");
            }
        }
        Some(id)
    }

    fn update(
        &self,
        tmux_session: &TmuxSession,
        pane: Option<Pane>,
        content: String,
        info: PaneInfo,
        now: DateTime<Utc>,
    ) {
        let name = tmux_session.name.as_str();
        let (old, new, last_line) = {
            let mut sessions = self.write();
            let Some(state) = sessions.get_mut(name) else {
                return;
            };
            let old = state.status;
            state.apply_capture(content, info, now);
            state.attached = tmux_session.attached;
            state.pane = pane;
            (old, state.status, state.last_line.clone())
        };

        if old == new {
            return;
        }

        debug!(session = name, from = %old, to = %new, "state changed");
        self.events.push(Event::state_changed(name, new).with_time(now));

        if old == AgentStatus::Thinking && matches!(new, AgentStatus::Idle | AgentStatus::Active) {
            self.events.push(Event::task_completed(name, new).with_time(now));
        }
        if new == AgentStatus::NeedsInput {
            self.events.push(Event::urgent(name, &last_line).with_time(now));
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.touch_session(name) {
                warn!(session = name, "failed to touch session: {e}");
            }
        }
    }

    fn retire_missing(&self, seen: &HashSet<&str>, now: DateTime<Utc>) {
        let retired: Vec<String> = {
            let mut sessions = self.write();
            let gone: Vec<String> = sessions
                .keys()
                .filter(|name| !seen.contains(name.as_str()))
                .cloned()
                .collect();
            for name in &gone {
                sessions.remove(name);
            }
            gone
        };

        for name in retired {
            self.ledger.unwatch(&name);
            if let Some(store) = &self.store {
                if let Err(e) = store.delete_session(&name) {
                    warn!(session = %name, "failed to delete session row: {e}");
                }
            }
            info!(session = %name, "session closed");
            self.events.push(Event::closed(&name).with_time(now));
        }
    }

    fn debug_event(&self, message: String) {
        debug!("{message}");
        if self.config.debug {
            self.events.push(Event::debug(message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tmux::{AgentMode, ScriptedMux};
    use std::time::Duration;

    const THINKING: &str = "Claude Code\n✽ Thinking… (ctrl+c to interrupt)";
    const IDLE: &str = "Claude Code\nDone.\n❯ ";
    const URGENT: &str = "Claude Code\nAllow write to src/main.rs? [Y/n]";
    const SHELL: &str = "$ ls\nCargo.toml src";

    fn build(mux: &Arc<ScriptedMux>) -> (PollDaemon, EventReceiver) {
        let (tx, rx) = event_queue(100);
        let daemon = PollDaemon::new(
            mux.clone(),
            Arc::new(UsageLedger::new(None)),
            tx,
            MonitorConfig::default(),
        );
        (daemon, rx)
    }

    fn kinds(rx: &mut EventReceiver) -> Vec<(EventKind, Option<AgentStatus>)> {
        rx.drain().into_iter().map(|e| (e.kind, e.state)).collect()
    }

    #[tokio::test]
    async fn test_discovery_emits_single_event() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), THINKING);
        let (daemon, mut rx) = build(&mux);

        daemon.poll_once().await;
        assert_eq!(
            kinds(&mut rx),
            vec![(EventKind::Discovered, Some(AgentStatus::Thinking))]
        );

        // Unchanged state is silent
        daemon.poll_once().await;
        assert!(rx.is_empty());
        assert_eq!(daemon.session("api").unwrap().pane, Some(Pane::new(0, 0)));
    }

    #[tokio::test]
    async fn test_non_agent_sessions_are_skipped() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("shell", None);
        mux.set_pane("shell", Pane::new(0, 0), SHELL);
        let (daemon, rx) = build(&mux);

        daemon.poll_once().await;
        assert!(rx.is_empty());
        assert_eq!(daemon.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_thinking_to_idle_emits_task_completed() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), THINKING);
        let (daemon, mut rx) = build(&mux);
        daemon.poll_once().await;
        rx.drain();

        mux.set_pane("api", Pane::new(0, 0), IDLE);
        daemon.poll_once().await;
        assert_eq!(
            kinds(&mut rx),
            vec![
                (EventKind::StateChanged, Some(AgentStatus::Idle)),
                (EventKind::TaskCompleted, Some(AgentStatus::Idle)),
            ]
        );
    }

    #[tokio::test]
    async fn test_thinking_to_active_emits_task_completed() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), THINKING);
        let (daemon, mut rx) = build(&mux);
        daemon.poll_once().await;
        rx.drain();

        mux.set_pane("api", Pane::new(0, 0), "Claude Code\nEditing src/lib.rs");
        daemon.poll_once().await;
        assert_eq!(
            kinds(&mut rx),
            vec![
                (EventKind::StateChanged, Some(AgentStatus::Active)),
                (EventKind::TaskCompleted, Some(AgentStatus::Active)),
            ]
        );
        assert_eq!(daemon.session("api").unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_mode_follows_latest_capture() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        let (daemon, mut rx) = build(&mux);
        daemon.poll_once().await;
        assert_eq!(daemon.session("api").unwrap().mode, None);
        rx.drain();

        mux.set_pane(
            "api",
            Pane::new(0, 0),
            "Claude Code\nDone.\n❯ \n⏸ plan mode on (shift+tab to cycle)",
        );
        daemon.poll_once().await;
        let state = daemon.session("api").unwrap();
        assert_eq!(state.mode, Some(AgentMode::Plan));
        assert_eq!(state.status, AgentStatus::Idle);

        // A mode switch alone is not a state change
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_urgent_transition_carries_last_line() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        let (daemon, mut rx) = build(&mux);
        daemon.poll_once().await;
        rx.drain();

        mux.set_pane("api", Pane::new(0, 0), URGENT);
        daemon.poll_once().await;
        let events = rx.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::StateChanged);
        assert_eq!(events[1].kind, EventKind::Urgent);
        assert_eq!(
            events[1].message.as_deref(),
            Some("Allow write to src/main.rs? [Y/n]")
        );
    }

    #[tokio::test]
    async fn test_closed_emitted_once() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        let (daemon, mut rx) = build(&mux);
        daemon.poll_once().await;
        rx.drain();

        mux.remove_session("api");
        daemon.poll_once().await;
        daemon.poll_once().await;
        assert_eq!(kinds(&mut rx), vec![(EventKind::Closed, None)]);
        assert!(daemon.session("api").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_noop() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        let (daemon, mut rx) = build(&mux);
        daemon.poll_once().await;
        rx.drain();

        mux.set_running(false);
        daemon.poll_once().await;
        assert!(rx.is_empty());
        assert_eq!(daemon.tracked_count(), 1);
    }

    #[tokio::test]
    async fn test_agent_relocated_when_it_moves_panes() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        mux.set_pane("api", Pane::new(0, 1), SHELL);
        let (daemon, _rx) = build(&mux);
        daemon.poll_once().await;
        assert_eq!(daemon.session("api").unwrap().pane, Some(Pane::new(0, 0)));

        mux.set_pane("api", Pane::new(0, 0), SHELL);
        mux.set_pane("api", Pane::new(0, 1), THINKING);
        daemon.poll_once().await;
        let state = daemon.session("api").unwrap();
        assert_eq!(state.pane, Some(Pane::new(0, 1)));
        assert_eq!(state.status, AgentStatus::Thinking);
    }

    #[tokio::test]
    async fn test_capture_failure_skips_session_for_cycle() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        let (daemon, mut rx) = build(&mux);
        daemon.poll_once().await;
        rx.drain();

        mux.fail_captures("api", true);
        daemon.poll_once().await;
        assert!(rx.is_empty());
        assert_eq!(daemon.session("api").unwrap().status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_default_pane_fallback() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_default_content("api", IDLE);
        let (daemon, mut rx) = build(&mux);

        daemon.poll_once().await;
        assert_eq!(rx.drain().len(), 1);
        assert_eq!(daemon.session("api").unwrap().pane, None);
    }

    #[tokio::test]
    async fn test_debug_events_only_when_enabled() {
        let mux = Arc::new(ScriptedMux::new());
        mux.set_running(false);

        let (daemon, rx) = build(&mux);
        daemon.poll_once().await;
        assert!(rx.is_empty());

        let (tx, mut rx) = event_queue(10);
        let config = MonitorConfig {
            debug: true,
            ..MonitorConfig::default()
        };
        let daemon = PollDaemon::new(mux.clone(), Arc::new(UsageLedger::new(None)), tx, config);
        daemon.poll_once().await;
        assert_eq!(kinds(&mut rx), vec![(EventKind::Debug, None)]);
    }

    #[tokio::test]
    async fn test_persisted_transcript_lock_is_reused() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", Some("/home/dev/app"));
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        let store = Arc::new(MemoryStore::new());
        store.lock_transcript("api", "persisted-id").unwrap();

        let (daemon, _rx) = build(&mux);
        let daemon = daemon.with_store(store.clone());
        daemon.poll_once().await;

        let state = daemon.session("api").unwrap();
        assert_eq!(state.transcript_id.as_deref(), Some("persisted-id"));
        assert_eq!(state.working_dir.as_deref(), Some("/home/dev/app"));

        mux.remove_session("api");
        daemon.poll_once().await;
        assert!(!store.has_session("api"));
    }

    #[tokio::test]
    async fn test_sessions_sorted_by_creation() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("b", None);
        mux.add_session("a", None);
        mux.set_created("b", 100);
        mux.set_created("a", 200);
        mux.set_pane("a", Pane::new(0, 0), IDLE);
        mux.set_pane("b", Pane::new(0, 0), IDLE);
        let (daemon, _rx) = build(&mux);
        daemon.poll_once().await;

        let names: Vec<_> = daemon.sessions().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        let (daemon, mut rx) = build(&mux);
        let daemon = Arc::new(daemon);
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run(stop_rx).await })
        };

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.kind, EventKind::Discovered);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
    }
}
