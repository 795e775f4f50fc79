//! Runtime configuration.
//!
//! Every component takes its slice of this tree at construction time. The
//! structs derive `Deserialize` so an outer loader can fill them in; this
//! crate itself only knows defaults and a handful of environment overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub usage: UsageConfig,
    pub scoring: ScoringConfig,
    pub rate: RateConfig,
    pub streak: StreakConfig,
    pub timer: TimerConfig,
    pub hotkeys: HotkeyConfig,
    pub focus: FocusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Usage summaries are refreshed once every this many poll ticks.
    pub usage_every_polls: u32,
    pub event_capacity: usize,
    /// Push `Debug` events onto the queue.
    pub debug: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            usage_every_polls: 5,
            event_capacity: 100,
            debug: false,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn usage_interval(&self) -> Duration {
        self.poll_interval() * self.usage_every_polls.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Root holding one transcript directory per working directory.
    pub projects_dir: Option<PathBuf>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            projects_dir: dirs::home_dir().map(|home| home.join(".claude").join("projects")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub tick_interval_ms: u64,
    pub points_task_complete: u32,
    pub points_urgent_handled: u32,
    pub points_interval_complete: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            points_task_complete: 100,
            points_urgent_handled: 500,
            points_interval_complete: 1000,
        }
    }
}

impl ScoringConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub window_secs: u64,
    /// The rate is reported per this many seconds (60 gives actions per minute).
    pub unit_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            unit_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreakConfig {
    pub multiplier_cap: f64,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            multiplier_cap: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub work_minutes: u64,
    pub short_break_minutes: u64,
    pub long_break_minutes: u64,
    pub intervals_before_long_break: u32,
    /// Score multiplier while the timer is not stopped.
    pub multiplier: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            intervals_before_long_break: 4,
            multiplier: 1.5,
        }
    }
}

impl TimerConfig {
    pub fn work(&self) -> Duration {
        Duration::from_secs(self.work_minutes * 60)
    }

    pub fn short_break(&self) -> Duration {
        Duration::from_secs(self.short_break_minutes * 60)
    }

    pub fn long_break(&self) -> Duration {
        Duration::from_secs(self.long_break_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    pub double_activation_ms: u64,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            double_activation_ms: 300,
        }
    }
}

impl HotkeyConfig {
    pub fn double_activation(&self) -> Duration {
        Duration::from_millis(self.double_activation_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub bonus_minutes: u64,
    pub bonus_multiplier: f64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            bonus_minutes: 5,
            bonus_multiplier: 1.2,
        }
    }
}

impl FocusConfig {
    pub fn bonus_after(&self) -> Duration {
        Duration::from_secs(self.bonus_minutes * 60)
    }
}

impl Config {
    /// Defaults with `AGENT_DECK_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(debug) = lookup("AGENT_DECK_DEBUG") {
            self.monitor.debug = debug == "1" || debug.eq_ignore_ascii_case("true");
        }
        if let Some(ms) = lookup("AGENT_DECK_POLL_MS").and_then(|v| v.parse().ok()) {
            self.monitor.poll_interval_ms = ms;
        }
        if let Some(dir) = lookup("AGENT_DECK_PROJECTS_DIR").filter(|v| !v.is_empty()) {
            self.usage.projects_dir = Some(PathBuf::from(dir));
        }
    }
}
