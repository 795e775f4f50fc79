use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::RateConfig;

const MIN_ELAPSED: Duration = Duration::from_secs(1);

/// Rolling-window action rate.
///
/// Until the oldest action in the window is one unit old the count is
/// extrapolated to a per-unit rate; after that the raw count is reported.
#[derive(Debug, Clone)]
pub struct ActionRateTracker {
    window: Duration,
    unit: Duration,
    actions: VecDeque<Instant>,
}

impl ActionRateTracker {
    pub fn new(config: &RateConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs.max(1)),
            unit: Duration::from_secs(config.unit_secs.max(1)),
            actions: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.actions.push_back(now);
    }

    /// Drop actions that fell out of the window
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.actions.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.actions.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let Some(&oldest) = self.actions.front() else {
            return 0.0;
        };

        let count = self.actions.len() as f64;
        let elapsed = now.saturating_duration_since(oldest).max(MIN_ELAPSED);
        if elapsed < self.unit {
            count * self.unit.as_secs_f64() / elapsed.as_secs_f64()
        } else {
            count
        }
    }

    /// Actions currently inside the window (as of the last prune)
    pub fn count(&self) -> usize {
        self.actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ActionRateTracker {
        ActionRateTracker::new(&RateConfig::default())
    }

    #[test]
    fn test_empty_rate_is_zero() {
        assert_eq!(tracker().rate(Instant::now()), 0.0);
    }

    #[test]
    fn test_single_action_clamps_elapsed_to_one_second() {
        let mut rate = tracker();
        let now = Instant::now();
        rate.record(now);
        assert_eq!(rate.rate(now), 60.0);
    }

    #[test]
    fn test_extrapolates_inside_first_unit() {
        let mut rate = tracker();
        let start = Instant::now();
        for i in 0..10 {
            rate.record(start + Duration::from_secs(i));
        }
        // 10 actions over 20s -> 30 per minute
        assert_eq!(rate.rate(start + Duration::from_secs(20)), 30.0);
    }

    #[test]
    fn test_raw_count_after_full_unit() {
        let mut rate = tracker();
        let start = Instant::now();
        rate.record(start);
        rate.record(start + Duration::from_secs(30));
        rate.record(start + Duration::from_secs(50));
        assert_eq!(rate.rate(start + Duration::from_secs(60)), 3.0);
    }

    #[test]
    fn test_prunes_outside_window() {
        let mut rate = tracker();
        let start = Instant::now();
        rate.record(start);
        rate.record(start + Duration::from_secs(55));

        rate.prune(start + Duration::from_secs(61));
        assert_eq!(rate.count(), 1);

        rate.prune(start + Duration::from_secs(200));
        assert_eq!(rate.count(), 0);
    }
}
