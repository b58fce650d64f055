//! Named timer handles with at-most-one-per-key semantics.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::task::JoinHandle;

/// Table of pending timers keyed by task name.
///
/// A timer is a spawned task that sleeps and then does its work. Arming a key
/// that already holds a timer aborts the old one first, so a key never has
/// two timers in flight. A timer that has fired removes itself with
/// [`TimerTable::disarm`] before doing its work, which means only *pending*
/// (still sleeping) timers live in the table.
pub struct TimerTable<K> {
    slots: HashMap<K, JoinHandle<()>>,
}

impl<K: Eq + Hash> TimerTable<K> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Store `handle` under `key`, aborting any timer it replaces.
    /// Returns true if a previous timer was cancelled.
    pub fn arm(&mut self, key: K, handle: JoinHandle<()>) -> bool {
        match self.slots.insert(key, handle) {
            Some(previous) => {
                let was_pending = !previous.is_finished();
                previous.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Forget the timer under `key` without aborting it.
    pub fn disarm(&mut self, key: &K) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Abort and remove the timer under `key`.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.slots.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every timer whose key matches.
    pub fn cancel_where(&mut self, mut matches: impl FnMut(&K) -> bool) -> usize {
        let mut cancelled = 0;
        self.slots.retain(|key, handle| {
            if matches(key) {
                handle.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.slots.len();
        for (_, handle) in self.slots.drain() {
            handle.abort();
        }
        cancelled
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.slots
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of timers still waiting to fire.
    pub fn len(&self) -> usize {
        self.slots.values().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash> Default for TimerTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TimerTable<K> {
    fn drop(&mut self) {
        for (_, handle) in self.slots.drain() {
            handle.abort();
        }
    }
}
