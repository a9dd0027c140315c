//! Bounded snapshot undo/redo.
//!
//! ```text
//!   past (oldest … newest)   present   future (next … last)
//!   [s0, s1, s2]             s3        [s4, s5]
//! ```
//!
//! `push_state` moves `present` onto `past` and drops the redo branch.
//! Snapshots are `Arc`-shared immutable maps; the manager never holds a
//! reference into the live store.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::model::ShapeMap;

/// Immutable copy of the full shape map.
pub type Snapshot = Arc<ShapeMap>;

/// Default number of undo steps kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct HistoryManager {
    past: VecDeque<Snapshot>,
    present: Option<Snapshot>,
    future: VecDeque<Snapshot>,
    limit: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryManager {
    pub fn new(limit: usize) -> Self {
        Self {
            past: VecDeque::new(),
            present: None,
            future: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Record the state after a discrete user action.
    pub fn push_state(&mut self, snapshot: Snapshot) {
        if let Some(previous) = self.present.replace(snapshot) {
            self.past.push_back(previous);
            while self.past.len() > self.limit {
                self.past.pop_front();
            }
        }
        self.future.clear();
    }

    /// Step back one entry and return the state to restore.
    pub fn undo(&mut self) -> Option<Snapshot> {
        let restored = self.past.pop_back()?;
        if let Some(current) = self.present.replace(restored.clone()) {
            self.future.push_front(current);
        }
        Some(restored)
    }

    pub fn redo(&mut self) -> Option<Snapshot> {
        let restored = self.future.pop_front()?;
        if let Some(current) = self.present.replace(restored.clone()) {
            self.past.push_back(current);
            while self.past.len() > self.limit {
                self.past.pop_front();
            }
        }
        Some(restored)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn present(&self) -> Option<&Snapshot> {
        self.present.as_ref()
    }

    pub fn past_len(&self) -> usize {
        self.past.len()
    }

    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Forget everything (session reset).
    pub fn clear(&mut self) {
        self.past.clear();
        self.present = None;
        self.future.clear();
    }
}
