//! In-memory object store: the client's authoritative cache of shapes.
//!
//! Every mutation funnels through the lock guard in [`ObjectStore::update`]:
//!
//! ```text
//!   update(id, requestor, patch)
//!     ├─ id unknown              → Missing   (no change)
//!     ├─ locked_by ∉ {∅, requestor} → Locked   (no change)
//!     └─ otherwise               → merge + normalize → Applied
//! ```
//!
//! Lock and unlock calls bypass the guard; arbitration of who may take a
//! lock happens in the session layer before the store is touched.

use std::sync::Arc;

use crate::model::{Shape, ShapeId, ShapeMap, ShapePatch};

/// Result of a guarded update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Another user holds the lock; nothing changed.
    Locked { holder: String },
    /// No shape with that id.
    Missing,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

/// Owner of the live shape map.
#[derive(Debug, Default, Clone)]
pub struct ObjectStore {
    shapes: ShapeMap,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_shapes(shapes: ShapeMap) -> Self {
        Self { shapes }
    }

    /// Insert or overwrite unconditionally.
    pub fn add(&mut self, shape: Shape) {
        self.shapes.insert(shape.id.clone(), shape);
    }

    /// Merge `patch` into shape `id` if `requestor` may mutate it.
    pub fn update(&mut self, id: &str, requestor: &str, patch: &ShapePatch) -> UpdateOutcome {
        let Some(shape) = self.shapes.get_mut(id) else {
            return UpdateOutcome::Missing;
        };
        if let Some(holder) = shape.locked_by.as_deref() {
            if holder != requestor {
                log::debug!("update of {id} by {requestor} rejected, locked by {holder}");
                return UpdateOutcome::Locked {
                    holder: holder.to_string(),
                };
            }
        }
        shape.apply_patch(patch);
        UpdateOutcome::Applied
    }

    pub fn lock(&mut self, id: &str, user_id: &str) {
        if let Some(shape) = self.shapes.get_mut(id) {
            shape.locked_by = Some(user_id.to_string());
        }
    }

    pub fn unlock(&mut self, id: &str) {
        if let Some(shape) = self.shapes.get_mut(id) {
            shape.locked_by = None;
        }
    }

    /// Lock every known id in `ids` for `user_id`. Unknown ids are skipped.
    pub fn batch_lock<S: AsRef<str>>(&mut self, ids: &[S], user_id: &str) {
        for id in ids {
            self.lock(id.as_ref(), user_id);
        }
    }

    pub fn batch_unlock<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            self.unlock(id.as_ref());
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Shape> {
        self.shapes.remove(id)
    }

    /// Replace the whole collection (reconcile, remote sync, undo/redo).
    pub fn set_all(&mut self, shapes: ShapeMap) {
        self.shapes = shapes;
    }

    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shapes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn shapes(&self) -> &ShapeMap {
        &self.shapes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.values()
    }

    /// Immutable copy of the current map for the history stack.
    pub fn snapshot(&self) -> Arc<ShapeMap> {
        Arc::new(self.shapes.clone())
    }

    /// Shapes in draw order (lowest z first, id as tiebreak).
    pub fn sorted_by_z(&self) -> Vec<&Shape> {
        let mut shapes: Vec<&Shape> = self.shapes.values().collect();
        shapes.sort_by(|a, b| a.z_index.cmp(&b.z_index).then_with(|| a.id.cmp(&b.id)));
        shapes
    }

    /// One above the current maximum z-index (0 for an empty store).
    pub fn next_z_index(&self) -> i64 {
        self.shapes
            .values()
            .map(|s| s.z_index)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Ids of every shape `user_id` currently holds.
    pub fn locked_by(&self, user_id: &str) -> Vec<ShapeId> {
        self.shapes
            .values()
            .filter(|s| s.locked_by.as_deref() == Some(user_id))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn is_locked_by_other(&self, id: &str, user_id: &str) -> bool {
        self.shapes
            .get(id)
            .is_some_and(|s| s.is_locked_by_other(user_id))
    }
}
