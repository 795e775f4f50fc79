//! Points, action rate, streaks, interval timer and hotkey slots.
//!
//! Each tracker sits behind its own lock. Reads that combine several of
//! them (the multiplier, [`ScoreSnapshot`]) take the locks one at a time
//! and are not transactionally consistent.

mod hotkeys;
mod rate;
mod streak;
mod timer;

pub use hotkeys::{Activation, HotkeyRegistry, SLOT_COUNT};
pub use rate::ActionRateTracker;
pub use streak::MultiSessionStreak;
pub use timer::{IntervalTimer, TimerState, TimerTransition};

use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, FocusConfig, ScoringConfig, TimerConfig};
use crate::daemon::{Event, EventKind, EventSender};
use crate::error::Result;
use crate::store::{ScoreState, SessionStore};
use crate::tmux::AgentStatus;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// User actions that feed the action rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Keypress,
    Switch,
    HotkeyAssign,
    TimerToggle,
}

/// Daily and lifetime points
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ScoreBoard {
    daily: u64,
    total: u64,
    date: String,
}

impl ScoreBoard {
    /// Zero the daily score when the date moves on
    fn roll_over(&mut self, today: &str) {
        if self.date != today {
            self.daily = 0;
            self.date = today.to_string();
        }
    }

    fn add(&mut self, points: u64, today: &str) {
        self.roll_over(today);
        self.daily = self.daily.saturating_add(points);
        self.total = self.total.saturating_add(points);
    }
}

#[derive(Debug, Clone)]
struct Focus {
    session: String,
    since: Instant,
}

/// Point-in-time view across all trackers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSnapshot {
    pub daily_score: u64,
    pub total_score: u64,
    pub actions_per_minute: f64,
    pub streak_count: usize,
    pub streak_multiplier: f64,
    pub multiplier: f64,
    pub timer_state: TimerState,
    pub timer_remaining: Duration,
    pub intervals_completed: u32,
    pub hotkeys: BTreeMap<u8, String>,
}

pub struct ScoringEngine {
    points: ScoringConfig,
    timer_config: TimerConfig,
    focus_config: FocusConfig,
    board: Mutex<ScoreBoard>,
    rate: Mutex<ActionRateTracker>,
    streak: Mutex<MultiSessionStreak>,
    timer: Mutex<IntervalTimer>,
    hotkeys: Mutex<HotkeyRegistry>,
    focus: Mutex<Option<Focus>>,
    events: Option<EventSender>,
}

impl ScoringEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            points: config.scoring.clone(),
            timer_config: config.timer.clone(),
            focus_config: config.focus.clone(),
            board: Mutex::new(ScoreBoard {
                date: today(),
                ..ScoreBoard::default()
            }),
            rate: Mutex::new(ActionRateTracker::new(&config.rate)),
            streak: Mutex::new(MultiSessionStreak::new(&config.streak)),
            timer: Mutex::new(IntervalTimer::new(&config.timer, Instant::now())),
            hotkeys: Mutex::new(HotkeyRegistry::new(&config.hotkeys)),
            focus: Mutex::new(None),
            events: None,
        }
    }

    /// Push `IntervalCompleted` events onto `events`
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Current combined multiplier: streak, timer and focus bonus
    pub fn multiplier(&self, now: Instant) -> f64 {
        let streak = lock(&self.streak).multiplier();
        let timer = if lock(&self.timer).is_active() {
            self.timer_config.multiplier
        } else {
            1.0
        };
        let focus = match lock(&self.focus).as_ref() {
            Some(focus)
                if now.saturating_duration_since(focus.since) >= self.focus_config.bonus_after() =>
            {
                self.focus_config.bonus_multiplier
            }
            _ => 1.0,
        };
        streak * timer * focus
    }

    fn award(&self, base: u32, now: Instant) -> u64 {
        let points = (f64::from(base) * self.multiplier(now)).floor() as u64;
        lock(&self.board).add(points, &today());
        points
    }

    pub fn record_action(&self, kind: ActionKind) {
        self.record_action_at(kind, Instant::now());
    }

    pub fn record_action_at(&self, kind: ActionKind, now: Instant) {
        debug!(?kind, "action recorded");
        lock(&self.rate).record(now);
    }

    pub fn record_task_complete(&self) -> u64 {
        self.award(self.points.points_task_complete, Instant::now())
    }

    pub fn record_urgent_handled(&self) -> u64 {
        self.award(self.points.points_urgent_handled, Instant::now())
    }

    /// Track which session has focus; the bonus clock restarts only when
    /// focus moves to a different session.
    pub fn set_focus(&self, session: Option<&str>, now: Instant) {
        let mut focus = lock(&self.focus);
        match session {
            Some(name) if focus.as_ref().is_some_and(|f| f.session == name) => {}
            Some(name) => {
                *focus = Some(Focus {
                    session: name.to_string(),
                    since: now,
                })
            }
            None => *focus = None,
        }
    }

    /// Fold a daemon event into the trackers; returns points awarded
    pub fn apply_event(&self, event: &Event) -> u64 {
        let Some(session) = event.session_name() else {
            return 0;
        };

        match event.kind {
            EventKind::Discovered | EventKind::StateChanged => {
                let busy = matches!(
                    event.state,
                    Some(AgentStatus::Thinking | AgentStatus::Active)
                );
                lock(&self.streak).set_active(session, busy);
                0
            }
            EventKind::TaskCompleted => self.record_task_complete(),
            EventKind::Closed => {
                lock(&self.streak).remove(session);
                let cleared = lock(&self.hotkeys).remove_session(session);
                if !cleared.is_empty() {
                    debug!(session, ?cleared, "hotkey slots released");
                }
                let mut focus = lock(&self.focus);
                if focus.as_ref().is_some_and(|f| f.session == session) {
                    *focus = None;
                }
                0
            }
            _ => 0,
        }
    }

    /// Advance time-based state. Leaving a work interval awards points and
    /// emits `IntervalCompleted`.
    pub fn tick(&self, now: Instant) -> Option<TimerTransition> {
        lock(&self.rate).prune(now);
        let transition = lock(&self.timer).tick(now)?;

        if let TimerTransition::WorkCompleted(next) = transition {
            let points = self.award(self.points.points_interval_complete, now);
            info!(%next, points, "work interval complete");
            if let Some(events) = &self.events {
                events.push(Event::interval_completed(points));
            }
        }
        Some(transition)
    }

    pub fn toggle_timer(&self, now: Instant) -> TimerState {
        let mut timer = lock(&self.timer);
        timer.toggle(now);
        timer.state()
    }

    pub fn stop_timer(&self) {
        lock(&self.timer).stop();
    }

    pub fn timer_state(&self) -> TimerState {
        lock(&self.timer).state()
    }

    pub fn assign_hotkey(&self, slot: u8, session: &str) -> Result<()> {
        lock(&self.hotkeys).assign(slot, session)
    }

    pub fn cycle_hotkey(&self, slot: u8, now: Instant) -> Result<Activation> {
        lock(&self.hotkeys).cycle(slot, now)
    }

    pub fn first_free_slot(&self) -> Option<u8> {
        lock(&self.hotkeys).first_free_slot()
    }

    pub fn hotkey_slots_for(&self, session: &str) -> Vec<u8> {
        lock(&self.hotkeys).slots_for(session)
    }

    pub fn hotkeys(&self) -> BTreeMap<u8, String> {
        lock(&self.hotkeys).all()
    }

    pub fn daily_score(&self) -> u64 {
        let mut board = lock(&self.board);
        board.roll_over(&today());
        board.daily
    }

    pub fn total_score(&self) -> u64 {
        lock(&self.board).total
    }

    pub fn actions_per_minute(&self, now: Instant) -> f64 {
        lock(&self.rate).rate(now)
    }

    pub fn snapshot(&self, now: Instant) -> ScoreSnapshot {
        let (timer_state, timer_remaining, intervals_completed) = {
            let timer = lock(&self.timer);
            (timer.state(), timer.remaining(), timer.completed_count())
        };
        let (streak_count, streak_multiplier) = {
            let streak = lock(&self.streak);
            (streak.count(), streak.multiplier())
        };

        ScoreSnapshot {
            daily_score: self.daily_score(),
            total_score: self.total_score(),
            actions_per_minute: self.actions_per_minute(now),
            streak_count,
            streak_multiplier,
            multiplier: self.multiplier(now),
            timer_state,
            timer_remaining,
            intervals_completed,
            hotkeys: self.hotkeys(),
        }
    }

    /// Restore score, timer and hotkeys. Failures leave defaults in place.
    pub fn load(&self, store: &dyn SessionStore, now: Instant) {
        match store.score_state() {
            Ok(Some(state)) => {
                {
                    let mut board = lock(&self.board);
                    board.daily = state.score;
                    board.total = state.total_score.max(state.score);
                    board.date = state.last_score_date.clone();
                    board.roll_over(&today());
                }
                lock(&self.timer).load(
                    &state.timer_state,
                    Duration::from_secs(state.timer_remaining_secs),
                    now,
                );
                info!(score = state.score, timer = %state.timer_state, "scoring state restored");
            }
            Ok(None) => {}
            Err(e) => warn!("failed to load scoring state: {e}"),
        }

        match store.hotkeys() {
            Ok(assignments) => lock(&self.hotkeys).load(&assignments),
            Err(e) => warn!("failed to load hotkeys: {e}"),
        }
    }

    pub fn save(&self, store: &dyn SessionStore) -> Result<()> {
        let state = {
            let board = lock(&self.board);
            let timer = lock(&self.timer);
            ScoreState {
                score: board.daily,
                total_score: board.total,
                last_score_date: board.date.clone(),
                timer_state: timer.state_name().to_string(),
                timer_remaining_secs: timer.remaining().as_secs(),
            }
        };
        store.save_score_state(&state)?;

        let assignments = self.hotkeys();
        for slot in 1..=SLOT_COUNT {
            match assignments.get(&slot) {
                Some(session) => store.set_hotkey(slot, session)?,
                None => store.clear_hotkey(slot)?,
            }
        }
        Ok(())
    }
}
