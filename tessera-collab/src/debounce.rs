//! Keyed debounce timers.
//!
//! A [`Debouncer`] collects values per key and releases them once the key
//! has been quiet for the window. Every push restarts the key's window.
//! The owner drives it: [`Debouncer::wait`] resolves at the earliest
//! deadline and [`Debouncer::take_due`] hands back what is ready, so the
//! session loop can `select!` on it alongside network events.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    deadline: Instant,
}

pub struct Debouncer<K, V> {
    window: Duration,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V> Debouncer<K, V> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Schedule `value` for `key`, replacing any pending value.
    pub fn push(&mut self, key: K, value: V) {
        self.merge_with(key, value, |_, new| new);
    }

    /// Schedule `value` for `key`, combining it with a pending value.
    pub fn merge_with(&mut self, key: K, value: V, merge: impl FnOnce(V, V) -> V) {
        let deadline = Instant::now() + self.window;
        let value = match self.entries.remove(&key) {
            Some(pending) => merge(pending.value, value),
            None => value,
        };
        self.entries.insert(key, Entry { value, deadline });
    }

    /// Drop a pending value. Returns it if there was one.
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Remove and return a pending value without waiting for its window.
    pub fn take(&mut self, key: &K) -> Option<V> {
        self.cancel(key)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest deadline among pending keys.
    pub fn deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Entries whose window has elapsed.
    pub fn take_due(&mut self) -> Vec<(K, V)> {
        let now = Instant::now();
        let due: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|entry| (key, entry.value)))
            .collect()
    }

    /// Everything pending, due or not.
    pub fn flush(&mut self) -> Vec<(K, V)> {
        self.entries
            .drain()
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }

    /// Resolve at the earliest deadline; never resolves while empty.
    pub async fn wait(&self) {
        match self.deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
