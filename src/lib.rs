//! Monitoring and scoring for AI coding agents running in tmux panes.

pub mod config;
pub mod daemon;
pub mod error;
pub mod scoring;
pub mod store;
pub mod tmux;
pub mod usage;

pub use config::Config;
pub use daemon::{event_queue, Event, EventKind, EventReceiver, EventSender, PollDaemon, SessionState};
pub use error::{DeckError, Result};
pub use scoring::{ScoreSnapshot, ScoringEngine};
pub use store::{FileStore, MemoryStore, ScoreState, SessionStore};
pub use tmux::{AgentStatus, Classifier, Multiplexer, TmuxClient};
pub use usage::{SessionUsage, TokenUsage, UsageLedger};
