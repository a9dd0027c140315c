//! In-process durable store.
//!
//! Clones share the same records, so two sessions in one test can talk to
//! the same "database". Failure switches let tests exercise rollback paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_core::{Shape, ShapeMap, ShapePatch};
use tokio::sync::watch;

use crate::channel::{DurableStore, Subscription};
use crate::error::StoreError;

struct Shared {
    records: watch::Sender<Arc<ShapeMap>>,
    fail_writes: AtomicBool,
    fail_loads: AtomicBool,
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_shapes(Vec::new())
    }

    /// Store preloaded with `shapes`, keyed by id.
    pub fn with_shapes(shapes: impl IntoIterator<Item = Shape>) -> Self {
        let shapes: ShapeMap = shapes.into_iter().map(|s| (s.id.clone(), s)).collect();
        let (records, _) = watch::channel(Arc::new(shapes));
        Self {
            shared: Arc::new(Shared {
                records,
                fail_writes: AtomicBool::new(false),
                fail_loads: AtomicBool::new(false),
            }),
        }
    }

    /// Make every save/update/delete fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.shared.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Current records, for assertions.
    pub fn records(&self) -> Arc<ShapeMap> {
        self.shared.records.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<Shape> {
        self.shared.records.borrow().get(id).cloned()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    async fn load_all(&self) -> Result<ShapeMap, StoreError> {
        if self.shared.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("loads disabled".into()));
        }
        Ok((**self.shared.records.borrow()).clone())
    }

    async fn save(&self, shape: &Shape) -> Result<(), StoreError> {
        self.check_writable()?;
        self.shared.records.send_modify(|records| {
            Arc::make_mut(records).insert(shape.id.clone(), shape.clone());
        });
        Ok(())
    }

    async fn update(&self, id: &str, patch: &ShapePatch) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut found = false;
        self.shared.records.send_if_modified(|records| {
            let Some(shape) = Arc::make_mut(records).get_mut(id) else {
                return false;
            };
            shape.apply_patch(patch);
            found = true;
            true
        });
        if found {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.shared
            .records
            .send_if_modified(|records| Arc::make_mut(records).remove(id).is_some());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<Arc<ShapeMap>> {
        Subscription::new(self.shared.records.subscribe())
    }
}
