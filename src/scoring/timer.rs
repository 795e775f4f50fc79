use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::TimerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    #[default]
    Stopped,
    Paused,
    Work,
    ShortBreak,
    LongBreak,
}

impl TimerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerState::Stopped => "stopped",
            TimerState::Paused => "paused",
            TimerState::Work => "work",
            TimerState::ShortBreak => "short_break",
            TimerState::LongBreak => "long_break",
        }
    }

    /// Parse a persisted name. Anything unrecognised is `Stopped`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "paused" => TimerState::Paused,
            "work" => TimerState::Work,
            "short_break" => TimerState::ShortBreak,
            "long_break" => TimerState::LongBreak,
            _ => TimerState::Stopped,
        }
    }

    fn is_running(&self) -> bool {
        matches!(
            self,
            TimerState::Work | TimerState::ShortBreak | TimerState::LongBreak
        )
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tick did besides counting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTransition {
    /// A work interval finished; the timer moved into the given break
    WorkCompleted(TimerState),
    BreakFinished,
}

/// Work/break interval timer.
///
/// Time is charged only between ticks while running. Pausing, resuming and
/// loading all reset the tick reference, so wall time spent paused or with
/// the process down is never counted.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    state: TimerState,
    paused_from: TimerState,
    remaining: Duration,
    last_tick: Instant,
    completed: u32,
    work: Duration,
    short_break: Duration,
    long_break: Duration,
    before_long_break: u32,
}

impl IntervalTimer {
    pub fn new(config: &TimerConfig, now: Instant) -> Self {
        Self {
            state: TimerState::Stopped,
            paused_from: TimerState::Work,
            remaining: Duration::ZERO,
            last_tick: now,
            completed: 0,
            work: config.work(),
            short_break: config.short_break(),
            long_break: config.long_break(),
            before_long_break: config.intervals_before_long_break.max(1),
        }
    }

    /// Begin a work interval. Only valid from `Stopped`.
    pub fn start(&mut self, now: Instant) {
        if self.state == TimerState::Stopped {
            self.state = TimerState::Work;
            self.remaining = self.work;
            self.last_tick = now;
        }
    }

    pub fn stop(&mut self) {
        self.state = TimerState::Stopped;
        self.remaining = Duration::ZERO;
    }

    pub fn pause(&mut self) {
        if self.state.is_running() {
            self.paused_from = self.state;
            self.state = TimerState::Paused;
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if self.state == TimerState::Paused {
            self.state = self.paused_from;
            self.last_tick = now;
        }
    }

    pub fn toggle(&mut self, now: Instant) {
        match self.state {
            TimerState::Stopped => self.start(now),
            TimerState::Paused => self.resume(now),
            _ => self.pause(),
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<TimerTransition> {
        if !self.state.is_running() {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        if self.remaining > elapsed {
            self.remaining -= elapsed;
            return None;
        }

        self.remaining = Duration::ZERO;
        Some(self.advance())
    }

    fn advance(&mut self) -> TimerTransition {
        match self.state {
            TimerState::Work => {
                self.completed += 1;
                if self.completed >= self.before_long_break {
                    self.state = TimerState::LongBreak;
                    self.remaining = self.long_break;
                    self.completed = 0;
                } else {
                    self.state = TimerState::ShortBreak;
                    self.remaining = self.short_break;
                }
                TimerTransition::WorkCompleted(self.state)
            }
            _ => {
                self.state = TimerState::Work;
                self.remaining = self.work;
                TimerTransition::BreakFinished
            }
        }
    }

    /// Restore persisted state. A paused timer resumes into work.
    pub fn load(&mut self, name: &str, remaining: Duration, now: Instant) {
        self.state = TimerState::from_name(name);
        self.paused_from = TimerState::Work;
        self.remaining = if self.state == TimerState::Stopped {
            Duration::ZERO
        } else {
            remaining
        };
        self.last_tick = now;
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Anything but stopped, paused included
    pub fn is_active(&self) -> bool {
        self.state != TimerState::Stopped
    }

    pub fn is_working(&self) -> bool {
        self.state == TimerState::Work
    }

    /// Work intervals completed since the last long break
    pub fn completed_count(&self) -> u32 {
        self.completed
    }
}
