use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use agent_deck::config::MonitorConfig;
use agent_deck::tmux::{Pane, ScriptedMux};
use agent_deck::usage::encode_project_dir;
use agent_deck::{
    event_queue, AgentStatus, Config, EventKind, FileStore, MemoryStore, PollDaemon,
    ScoringEngine, SessionStore, UsageLedger,
};

const THINKING: &str = "\x1b[1mClaude Code\x1b[0m\n\x1b[33m✽ Thinking… (ctrl+c to interrupt)\x1b[0m";
const IDLE: &str = "Claude Code\nAll tests pass.\n❯ ";

fn assistant_line(input: u64, output: u64, write: u64, read: u64) -> String {
    format!(
        "{{\"type\":\"assistant\",\"message\":{{\"model\":\"claude-sonnet-4\",\"usage\":{{\"input_tokens\":{input},\"output_tokens\":{output},\"cache_creation_input_tokens\":{write},\"cache_read_input_tokens\":{read}}}}}}}\n"
    )
}

fn set_age(path: &std::path::Path, age_secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(age_secs))
        .unwrap();
}

#[tokio::test]
async fn test_thinking_to_idle_then_closed() {
    let mux = Arc::new(ScriptedMux::new());
    mux.add_session("api", None);
    mux.set_pane("api", Pane::new(0, 0), THINKING);

    let (tx, mut rx) = event_queue(100);
    let daemon = PollDaemon::new(
        mux.clone(),
        Arc::new(UsageLedger::new(None)),
        tx,
        MonitorConfig::default(),
    );
    let engine = ScoringEngine::new(&Config::default());

    // Discovery
    daemon.poll_once().await;
    let events = rx.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Discovered);
    assert_eq!(events[0].state, Some(AgentStatus::Thinking));
    for event in &events {
        engine.apply_event(event);
    }
    engine.assign_hotkey(1, "api").unwrap();
    engine.assign_hotkey(5, "api").unwrap();

    // Thinking -> idle
    mux.set_pane("api", Pane::new(0, 0), IDLE);
    daemon.poll_once().await;
    let events = rx.drain();
    let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.state)).collect();
    assert_eq!(
        kinds,
        vec![
            (EventKind::StateChanged, Some(AgentStatus::Idle)),
            (EventKind::TaskCompleted, Some(AgentStatus::Idle)),
        ]
    );
    let awarded: u64 = events.iter().map(|e| engine.apply_event(e)).sum();
    assert_eq!(awarded, 100);

    // Session disappears
    mux.remove_session("api");
    daemon.poll_once().await;
    daemon.poll_once().await;
    let events = rx.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Closed);
    assert_eq!(events[0].session_name(), Some("api"));
    engine.apply_event(&events[0]);

    assert!(daemon.session("api").is_none());
    assert!(engine.hotkey_slots_for("api").is_empty());
    assert!(engine.hotkeys().is_empty());
}

#[tokio::test]
async fn test_locked_transcript_survives_newer_files() {
    let workdir = "/home/dev/service";
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join(encode_project_dir(workdir));
    fs::create_dir_all(&project).unwrap();

    let first = project.join("first.jsonl");
    fs::write(
        &first,
        [assistant_line(100, 50, 200, 300), assistant_line(150, 75, 0, 500)].concat(),
    )
    .unwrap();
    set_age(&first, 60);

    let mux = Arc::new(ScriptedMux::new());
    mux.add_session("svc", Some(workdir));
    mux.set_pane("svc", Pane::new(1, 0), IDLE);

    let store = Arc::new(MemoryStore::new());
    let (tx, _rx) = event_queue(100);
    let daemon = PollDaemon::new(
        mux.clone(),
        Arc::new(UsageLedger::new(Some(root.path().to_path_buf()))),
        tx,
        MonitorConfig::default(),
    )
    .with_store(store.clone());

    daemon.poll_once().await;
    let state = daemon.session("svc").unwrap();
    assert_eq!(state.transcript_id.as_deref(), Some("first"));
    assert_eq!(
        store.locked_transcript("svc").unwrap().as_deref(),
        Some("first")
    );

    let usage = state.usage.unwrap();
    assert_eq!(usage.totals.input, 250);
    assert_eq!(usage.totals.output, 125);
    assert_eq!(usage.totals.cache_write, 200);
    assert_eq!(usage.totals.cache_read, 800);
    assert!(usage.estimated_cost > 0.0);

    // A newer transcript appears; the session stays on the first one
    fs::write(project.join("second.jsonl"), assistant_line(9_999, 0, 0, 0)).unwrap();
    fs::write(
        &first,
        [
            assistant_line(100, 50, 200, 300),
            assistant_line(150, 75, 0, 500),
            assistant_line(10, 5, 0, 0),
        ]
        .concat(),
    )
    .unwrap();

    daemon.poll_once().await;
    daemon.refresh_usage().await;

    let state = daemon.session("svc").unwrap();
    assert_eq!(state.transcript_id.as_deref(), Some("first"));
    assert_eq!(state.usage.unwrap().totals.input, 260);
}

#[tokio::test]
async fn test_scoring_state_survives_restart() {
    let store = MemoryStore::new();
    let config = Config::default();

    let engine = ScoringEngine::new(&config);
    engine.record_urgent_handled();
    engine.assign_hotkey(2, "api").unwrap();
    engine.save(&store).unwrap();

    let restored = ScoringEngine::new(&config);
    restored.load(&store, std::time::Instant::now());
    assert_eq!(restored.daily_score(), 500);
    assert_eq!(restored.first_free_slot(), Some(1));
    assert_eq!(restored.hotkey_slots_for("api"), vec![2]);
}

#[tokio::test]
async fn test_state_file_carries_locks_and_score_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent-deck").join("state.json");
    let config = Config::default();

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let mux = Arc::new(ScriptedMux::new());
        mux.add_session("api", None);
        mux.set_pane("api", Pane::new(0, 0), IDLE);
        store.lock_transcript("api", "abc123").unwrap();

        let (tx, _rx) = event_queue(100);
        let daemon = PollDaemon::new(
            mux,
            Arc::new(UsageLedger::new(None)),
            tx,
            config.monitor.clone(),
        )
        .with_store(store.clone());
        daemon.poll_once().await;

        let engine = ScoringEngine::new(&config);
        engine.record_task_complete();
        engine.assign_hotkey(3, "api").unwrap();
        engine.save(store.as_ref()).unwrap();
    }

    let store = FileStore::open(&path).unwrap();
    assert_eq!(
        store.locked_transcript("api").unwrap().as_deref(),
        Some("abc123")
    );

    let restored = ScoringEngine::new(&config);
    restored.load(&store, std::time::Instant::now());
    assert_eq!(restored.daily_score(), 100);
    assert_eq!(restored.hotkey_slots_for("api"), vec![3]);
}
