//! Work queue and retry backoff for controllers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::resource::ObjectKey;

/// Deduplicating, per-key serializing work queue.
///
/// A key is held at most once, at its earliest requested deadline. While a
/// pass for a key is running the key is not handed out again; requests that
/// arrive in the meantime are folded in when the pass finishes.
#[derive(Debug, Default)]
pub struct WorkQueue {
    scheduled: HashMap<ObjectKey, Instant>,
    deferred: HashMap<ObjectKey, Instant>,
    active: HashSet<ObjectKey>,
}

fn merge_earliest(map: &mut HashMap<ObjectKey, Instant>, key: ObjectKey, at: Instant) {
    map.entry(key)
        .and_modify(|existing| *existing = (*existing).min(at))
        .or_insert(at);
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pass for `key` no later than `at`.
    pub fn schedule(&mut self, key: ObjectKey, at: Instant) {
        if self.active.contains(&key) {
            merge_earliest(&mut self.deferred, key, at);
        } else {
            merge_earliest(&mut self.scheduled, key, at);
        }
    }

    /// Take the most overdue key whose deadline has passed, marking it
    /// active.
    pub fn pop_ready(&mut self, now: Instant) -> Option<ObjectKey> {
        let key = self
            .scheduled
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by_key(|(_, at)| **at)
            .map(|(key, _)| key.clone())?;
        self.scheduled.remove(&key);
        self.active.insert(key.clone());
        Some(key)
    }

    /// Mark the pass for `key` finished and schedule its follow-up, if any.
    pub fn finish(&mut self, key: &ObjectKey, next: Option<Instant>) {
        self.active.remove(key);
        if let Some(at) = self.deferred.remove(key) {
            merge_earliest(&mut self.scheduled, key.clone(), at);
        }
        if let Some(at) = next {
            merge_earliest(&mut self.scheduled, key.clone(), at);
        }
    }

    /// Mark a failed pass for `key` finished and retry it at `at`.
    ///
    /// Requests that arrived during the pass are folded into the retry
    /// rather than overtaking it; most of them are the pass's own writes.
    pub fn retry(&mut self, key: &ObjectKey, at: Instant) {
        self.active.remove(key);
        let at = self
            .deferred
            .remove(key)
            .map_or(at, |deferred| deferred.max(at));
        merge_earliest(&mut self.scheduled, key.clone(), at);
    }

    /// Earliest deadline among keys that can be handed out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduled.values().min().copied()
    }

    pub fn is_active(&self, key: &ObjectKey) -> bool {
        self.active.contains(key)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }
}

/// Capped exponential backoff per key.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: HashMap<ObjectKey, u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Delay before retrying `key` after another failure:
    /// `min(base * 2^failures, max)`.
    pub fn next(&mut self, key: &ObjectKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = 2u32
            .checked_pow(*failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max));
        *failures = failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
