//! Timer queue
//!
//! Deadlines are absolute instants on the coordinator's clock. Cancelling a
//! timer removes it from the queue, so a cancelled timer can never fire.

use chrono::{DateTime, Utc};
use corral_types::{AgentId, OfferId};
use std::collections::{BTreeMap, HashMap};

/// What a timer guards
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    OfferExpiry(OfferId),
    AgentReregistration(AgentId),
}

type Slot = (DateTime<Utc>, u64);

#[derive(Debug, Default)]
pub struct TimerQueue {
    queue: BTreeMap<Slot, TimerKind>,
    index: HashMap<TimerKind, Slot>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer, replacing any timer of the same kind
    pub fn schedule(&mut self, kind: TimerKind, at: DateTime<Utc>) {
        self.cancel(&kind);
        self.seq += 1;
        let slot = (at, self.seq);
        self.queue.insert(slot, kind.clone());
        self.index.insert(kind, slot);
    }

    /// Returns whether the timer was armed
    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        match self.index.remove(kind) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, kind: &TimerKind) -> bool {
        self.index.contains_key(kind)
    }

    /// Remove and return every timer due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<TimerKind> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let kind = entry.remove();
            self.index.remove(&kind);
            due.push(kind);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
