use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::HotkeyConfig;
use crate::error::{DeckError, Result};

pub const SLOT_COUNT: u8 = 10;

/// Outcome of activating a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub session: Option<String>,
    /// The same slot was activated within the double-activation threshold
    pub double: bool,
}

/// Numbered slots 1..=10, each holding at most one session name.
#[derive(Debug, Clone)]
pub struct HotkeyRegistry {
    threshold: Duration,
    slots: [Option<String>; SLOT_COUNT as usize],
    last_activation: [Option<Instant>; SLOT_COUNT as usize],
}

fn index(slot: u8) -> Result<usize> {
    if (1..=SLOT_COUNT).contains(&slot) {
        Ok(usize::from(slot - 1))
    } else {
        Err(DeckError::InvalidSlot(slot))
    }
}

impl HotkeyRegistry {
    pub fn new(config: &HotkeyConfig) -> Self {
        Self {
            threshold: config.double_activation(),
            slots: Default::default(),
            last_activation: [None; SLOT_COUNT as usize],
        }
    }

    /// Put `session` in `slot`, replacing whatever was there
    pub fn assign(&mut self, slot: u8, session: &str) -> Result<()> {
        self.slots[index(slot)?] = Some(session.to_string());
        Ok(())
    }

    pub fn get(&self, slot: u8) -> Option<&str> {
        index(slot).ok().and_then(|i| self.slots[i].as_deref())
    }

    pub fn clear(&mut self, slot: u8) -> Result<Option<String>> {
        Ok(self.slots[index(slot)?].take())
    }

    /// Clear `slot` only if it holds `session`
    pub fn remove(&mut self, slot: u8, session: &str) -> Result<bool> {
        let i = index(slot)?;
        if self.slots[i].as_deref() == Some(session) {
            self.slots[i] = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Clear every slot holding `session`; returns the cleared slots
    pub fn remove_session(&mut self, session: &str) -> Vec<u8> {
        let mut cleared = Vec::new();
        for (slot, entry) in (1..=SLOT_COUNT).zip(self.slots.iter_mut()) {
            if entry.as_deref() == Some(session) {
                *entry = None;
                cleared.push(slot);
            }
        }
        cleared
    }

    /// Session in `slot`, and whether this is a double activation.
    /// Every call records `now` as the slot's last activation.
    pub fn cycle(&mut self, slot: u8, now: Instant) -> Result<Activation> {
        let i = index(slot)?;
        let double = self.last_activation[i]
            .is_some_and(|last| now.saturating_duration_since(last) < self.threshold);
        self.last_activation[i] = Some(now);

        Ok(Activation {
            session: self.slots[i].clone(),
            double,
        })
    }

    pub fn first_free_slot(&self) -> Option<u8> {
        (1..=SLOT_COUNT)
            .zip(self.slots.iter())
            .find(|(_, entry)| entry.is_none())
            .map(|(slot, _)| slot)
    }

    pub fn slots_for(&self, session: &str) -> Vec<u8> {
        (1..=SLOT_COUNT)
            .zip(self.slots.iter())
            .filter(|(_, entry)| entry.as_deref() == Some(session))
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn all(&self) -> BTreeMap<u8, String> {
        (1..=SLOT_COUNT)
            .zip(self.slots.iter())
            .filter_map(|(slot, entry)| entry.clone().map(|session| (slot, session)))
            .collect()
    }

    /// Replace all assignments. Out-of-range slots are ignored.
    pub fn load(&mut self, assignments: &BTreeMap<u8, String>) {
        self.slots = Default::default();
        for (&slot, session) in assignments {
            if let Ok(i) = index(slot) {
                self.slots[i] = Some(session.clone());
            }
        }
    }
}
