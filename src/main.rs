use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use agent_deck::{
    event_queue, Config, Event, EventKind, FileStore, MemoryStore, PollDaemon, ScoringEngine,
    SessionStore, TmuxClient, UsageLedger,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env();
    let file_store = FileStore::default_path().and_then(FileStore::open);
    let store: Arc<dyn SessionStore> = match file_store {
        Ok(store) => {
            info!(path = %store.path().display(), "using state file");
            Arc::new(store)
        }
        Err(e) => {
            warn!("state file unavailable, keeping state in memory: {e}");
            Arc::new(MemoryStore::new())
        }
    };
    let (tx, mut rx) = event_queue(config.monitor.event_capacity);

    let ledger = Arc::new(UsageLedger::new(config.usage.projects_dir.clone()));
    let daemon = Arc::new(
        PollDaemon::new(
            Arc::new(TmuxClient::new()),
            ledger,
            tx.clone(),
            config.monitor.clone(),
        )
        .with_store(Arc::clone(&store)),
    );

    let engine = Arc::new(ScoringEngine::new(&config).with_events(tx));
    engine.load(store.as_ref(), Instant::now());

    let (stop_tx, stop_rx) = watch::channel(false);

    // Spawn poll loop
    let poller = {
        let daemon = Arc::clone(&daemon);
        let stop = stop_rx.clone();
        tokio::spawn(async move { daemon.run(stop).await })
    };

    // Spawn scoring tick
    let ticker = {
        let engine = Arc::clone(&engine);
        let mut stop = stop_rx;
        let every = config.scoring.tick_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        engine.tick(Instant::now());
                    }
                }
            }
        })
    };

    info!("agent-deck running, press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Main event loop
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                info!("shutting down");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => handle_event(&engine, &event),
                None => break,
            },
        }
    }

    let _ = stop_tx.send(true);
    poller.await.context("poll loop panicked")?;
    ticker.await.context("scoring tick panicked")?;

    for event in rx.drain() {
        handle_event(&engine, &event);
    }

    engine
        .save(store.as_ref())
        .context("failed to save scoring state")?;

    let snapshot = engine.snapshot(Instant::now());
    info!(
        daily = snapshot.daily_score,
        total = snapshot.total_score,
        sessions = daemon.tracked_count(),
        "stopped"
    );
    Ok(())
}

fn handle_event(engine: &ScoringEngine, event: &Event) {
    let session = event.session_name().unwrap_or("-");
    let message = event.message.as_deref().unwrap_or("");

    match event.kind {
        EventKind::Debug => debug!("{message}"),
        EventKind::Urgent => warn!(session, cause = message, "needs input"),
        EventKind::IntervalCompleted => info!("{message}"),
        kind => info!(session, ?kind, state = ?event.state, "session event"),
    }

    let points = engine.apply_event(event);
    if points > 0 {
        info!(session, points, "points awarded");
    }
}
