use std::collections::HashSet;

use crate::config::StreakConfig;

/// Bonus for keeping several sessions busy at once.
#[derive(Debug, Clone)]
pub struct MultiSessionStreak {
    cap: f64,
    active: HashSet<String>,
}

impl MultiSessionStreak {
    pub fn new(config: &StreakConfig) -> Self {
        Self {
            cap: config.multiplier_cap.max(1.0),
            active: HashSet::new(),
        }
    }

    pub fn set_active(&mut self, session: &str, active: bool) {
        if active {
            self.active.insert(session.to_string());
        } else {
            self.active.remove(session);
        }
    }

    pub fn remove(&mut self, session: &str) {
        self.active.remove(session);
    }

    pub fn count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, session: &str) -> bool {
        self.active.contains(session)
    }

    /// 1.0 for zero or one active session, otherwise the count up to the cap
    pub fn multiplier(&self) -> f64 {
        match self.active.len() {
            0 | 1 => 1.0,
            n => (n as f64).min(self.cap),
        }
    }
}
