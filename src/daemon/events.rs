//! Session events and the queue that carries them to consumers.
//!
//! Producers never block. `Debug` events are admitted only while the queue
//! holds fewer than `capacity` entries; every other kind is always queued so
//! that discovery, closure and state changes are never lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::tmux::AgentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Discovered,
    Closed,
    StateChanged,
    /// Derived from a thinking -> idle/active transition. A heuristic, not
    /// proof the task succeeded.
    TaskCompleted,
    Urgent,
    /// The interval timer finished a work interval
    IntervalCompleted,
    Debug,
}

impl EventKind {
    pub fn is_droppable(&self) -> bool {
        matches!(self, EventKind::Debug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// `None` for daemon-wide events (debug, interval timer)
    pub session: Option<String>,
    pub state: Option<AgentStatus>,
    pub at: DateTime<Utc>,
    pub message: Option<String>,
}

impl Event {
    pub fn session(kind: EventKind, session: &str, state: Option<AgentStatus>) -> Self {
        Self {
            kind,
            session: Some(session.to_string()),
            state,
            at: Utc::now(),
            message: None,
        }
    }

    pub fn discovered(session: &str, state: AgentStatus) -> Self {
        Self::session(EventKind::Discovered, session, Some(state))
    }

    pub fn closed(session: &str) -> Self {
        Self::session(EventKind::Closed, session, None)
    }

    pub fn state_changed(session: &str, state: AgentStatus) -> Self {
        Self::session(EventKind::StateChanged, session, Some(state))
    }

    pub fn task_completed(session: &str, state: AgentStatus) -> Self {
        Self::session(EventKind::TaskCompleted, session, Some(state))
    }

    pub fn urgent(session: &str, cause: &str) -> Self {
        Self {
            message: Some(cause.to_string()),
            ..Self::session(EventKind::Urgent, session, Some(AgentStatus::NeedsInput))
        }
    }

    pub fn interval_completed(points: u64) -> Self {
        Self {
            kind: EventKind::IntervalCompleted,
            session: None,
            state: None,
            at: Utc::now(),
            message: Some(format!("work interval complete (+{points})")),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Debug,
            session: None,
            state: None,
            at: Utc::now(),
            message: Some(message.into()),
        }
    }

    pub fn with_time(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn session_name(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Default)]
struct Counters {
    /// Events sent but not yet received
    depth: AtomicUsize,
    dropped: AtomicUsize,
}

/// Create a connected sender/receiver pair
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let counters = Arc::new(Counters::default());
    (
        EventSender {
            tx,
            counters: Arc::clone(&counters),
            capacity,
        },
        EventReceiver { rx, counters },
    )
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl EventSender {
    /// Enqueue without blocking. Returns `false` if a debug event was
    /// dropped because the queue is full, or if the receiver is gone.
    pub fn push(&self, event: Event) -> bool {
        if event.kind.is_droppable()
            && self.counters.depth.load(Ordering::Acquire) >= self.capacity
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("event queue full, dropping debug event");
            return false;
        }

        self.counters.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(event).is_err() {
            self.counters.depth.fetch_sub(1, Ordering::AcqRel);
            trace!("event receiver closed");
            return false;
        }
        true
    }

    /// Debug events dropped so far
    pub fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    counters: Arc<Counters>,
}

impl EventReceiver {
    fn received(&self, event: Option<Event>) -> Option<Event> {
        if event.is_some() {
            self.counters.depth.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }

    /// Next event, waiting if the queue is empty. `None` once every sender
    /// is gone and the queue has drained.
    pub async fn recv(&mut self) -> Option<Event> {
        let event = self.rx.recv().await;
        self.received(event)
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        let event = self.rx.try_recv().ok();
        self.received(event)
    }

    /// Everything currently queued, oldest first
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn len(&self) -> usize {
        self.counters.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
