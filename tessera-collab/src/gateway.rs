//! Dual-channel persistence.
//!
//! ```text
//!                       reconcile()   (once per gateway)
//!  durable.load_all ──► sweep stale locks ──► store.set_all ──► reseed realtime
//!                                                                 │ (prune extras)
//!                                                                 ▼
//!                                                       subscribe(shapes)
//!
//!  steady state:  save / update / delete
//!        ├── durable.*   ─┐
//!        └── realtime.put ┴─ tokio::join! ──► SyncError::Write { durable, broadcast }
//! ```
//!
//! After reconciliation the durable store is write-only; remote changes
//! arrive through the realtime subscription. A write that lands on one
//! channel but not the other is reported, logged, and left as is.

use std::sync::Arc;

use futures_util::future::join_all;
use tessera_core::{Mutation, ObjectStore, Shape, ShapeId, ShapeMap, ShapePatch};

use crate::channel::{DurableStore, Namespace, RealtimeChannel, Records, Subscription};
use crate::error::{ChannelError, StoreError, SyncError};

/// What startup reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Shapes read from the durable store
    pub loaded: usize,
    /// Stale locks cleared
    pub swept: usize,
    /// Shapes written to the realtime channel
    pub reseeded: usize,
    /// Realtime records removed for lack of a durable counterpart
    pub pruned: usize,
}

/// Decode realtime shape records. Malformed records are skipped.
pub fn decode_records(records: &Records) -> ShapeMap {
    records
        .iter()
        .filter_map(|(id, value)| match serde_json::from_value::<Shape>(value.clone()) {
            Ok(shape) => Some((id.clone(), shape)),
            Err(e) => {
                log::warn!("Skipping malformed shape record {id}: {e}");
                None
            }
        })
        .collect()
}

fn combine(
    what: &str,
    id: &str,
    durable: Result<(), StoreError>,
    broadcast: Result<(), ChannelError>,
) -> Result<(), SyncError> {
    let err = match (durable.err(), broadcast.err()) {
        (None, None) => return Ok(()),
        (durable, broadcast) => SyncError::Write { durable, broadcast },
    };
    if err.is_partial_write() {
        log::warn!("Partial {what} of {id}, channels now disagree: {err}");
    } else {
        log::debug!("{what} of {id} failed: {err}");
    }
    Err(err)
}

pub struct PersistenceGateway<D, R> {
    durable: Arc<D>,
    realtime: Arc<R>,
    reconciled: bool,
}

impl<D: DurableStore, R: RealtimeChannel> PersistenceGateway<D, R> {
    pub fn new(durable: Arc<D>, realtime: Arc<R>) -> Self {
        Self {
            durable,
            realtime,
            reconciled: false,
        }
    }

    /// Load, sweep, seed `store` and the realtime channel, then subscribe.
    ///
    /// Any failure here is fatal to the session. A second call returns
    /// [`SyncError::AlreadyReconciled`].
    pub async fn reconcile(
        &mut self,
        store: &mut ObjectStore,
    ) -> Result<(ReconcileReport, Subscription<Arc<Records>>), SyncError> {
        if self.reconciled {
            return Err(SyncError::AlreadyReconciled);
        }
        self.reconciled = true;
        let mut report = ReconcileReport::default();

        let mut shapes = self
            .durable
            .load_all()
            .await
            .map_err(|e| SyncError::Reconcile(format!("load failed: {e}")))?;
        report.loaded = shapes.len();

        report.swept = self
            .unlock_all(&shapes)
            .await
            .map_err(|e| SyncError::Reconcile(format!("lock sweep failed: {e}")))?;
        for shape in shapes.values_mut() {
            shape.locked_by = None;
        }
        store.set_all(shapes);

        let existing = self
            .realtime
            .subscribe(Namespace::Shapes)
            .await
            .map_err(|e| SyncError::Reconcile(format!("subscribe failed: {e}")))?
            .current();

        let realtime = &self.realtime;
        let puts = store.iter().map(|shape| async move {
            let value = serde_json::to_value(shape)?;
            realtime.put(Namespace::Shapes, &shape.id, value).await
        });
        let stale: Vec<&String> = existing.keys().filter(|id| !store.contains(id)).collect();
        let removals = stale
            .iter()
            .map(|id| realtime.remove(Namespace::Shapes, id));

        let (put_results, remove_results) = tokio::join!(join_all(puts), join_all(removals));
        if let Some(e) = put_results
            .into_iter()
            .chain(remove_results)
            .find_map(Result::err)
        {
            return Err(SyncError::Reconcile(format!("reseed failed: {e}")));
        }
        report.reseeded = store.len();
        report.pruned = stale.len();

        // Subscribe after the reseed so the first delivery is the clean set.
        let feed = self
            .realtime
            .subscribe(Namespace::Shapes)
            .await
            .map_err(|e| SyncError::Reconcile(format!("subscribe failed: {e}")))?;

        log::info!(
            "Reconciled: {} loaded, {} stale locks swept, {} reseeded, {} pruned",
            report.loaded, report.swept, report.reseeded, report.pruned
        );
        Ok((report, feed))
    }

    /// Clear every lock in the durable store concurrently. Startup only.
    pub async fn unlock_all(&self, shapes: &ShapeMap) -> Result<usize, StoreError> {
        let unlock = ShapePatch::unlock();
        let locked: Vec<&Shape> = shapes.values().filter(|s| s.locked_by.is_some()).collect();
        for shape in &locked {
            log::debug!(
                "Sweeping stale lock on {} held by {}",
                shape.id,
                shape.locked_by.as_deref().unwrap_or_default()
            );
        }
        let results = join_all(locked.iter().map(|s| self.durable.update(&s.id, &unlock))).await;
        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        Ok(locked.len())
    }

    /// Release every lock `user_id` holds, locally and on both channels.
    pub async fn unlock_all_owned_by(
        &self,
        store: &mut ObjectStore,
        user_id: &str,
    ) -> Result<Vec<ShapeId>, SyncError> {
        let owned = store.locked_by(user_id);
        if owned.is_empty() {
            return Ok(owned);
        }
        store.batch_unlock(&owned);
        let unlocks: Vec<Mutation> = owned
            .iter()
            .map(|id| Mutation::Update {
                id: id.clone(),
                patch: ShapePatch::unlock(),
            })
            .collect();
        self.persist_all(store, &unlocks).await?;
        log::info!("Released {} locks held by {user_id}", owned.len());
        Ok(owned)
    }

    /// Write a whole record to both channels.
    pub async fn save(&self, shape: &Shape) -> Result<(), SyncError> {
        let value = serde_json::to_value(shape).map_err(|e| SyncError::broadcast(e.into()))?;
        let (durable, broadcast) = tokio::join!(
            self.durable.save(shape),
            self.realtime.put(Namespace::Shapes, &shape.id, value)
        );
        combine("save", &shape.id, durable, broadcast)
    }

    /// Merge `patch` durably and broadcast the resulting record.
    pub async fn update(&self, shape_after: &Shape, patch: &ShapePatch) -> Result<(), SyncError> {
        let value =
            serde_json::to_value(shape_after).map_err(|e| SyncError::broadcast(e.into()))?;
        let (durable, broadcast) = tokio::join!(
            self.durable.update(&shape_after.id, patch),
            self.realtime.put(Namespace::Shapes, &shape_after.id, value)
        );
        combine("update", &shape_after.id, durable, broadcast)
    }

    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let (durable, broadcast) = tokio::join!(
            self.durable.delete(id),
            self.realtime.remove(Namespace::Shapes, id)
        );
        combine("delete", id, durable, broadcast)
    }

    /// Realtime write only, for intermediate drag frames.
    pub async fn broadcast_only(&self, shape: &Shape) -> Result<(), SyncError> {
        let value = serde_json::to_value(shape).map_err(|e| SyncError::broadcast(e.into()))?;
        self.realtime
            .put(Namespace::Shapes, &shape.id, value)
            .await
            .map_err(SyncError::broadcast)
    }

    /// Durable merge only, for debounced drag frames.
    pub async fn durable_update(&self, id: &str, patch: &ShapePatch) -> Result<(), SyncError> {
        self.durable
            .update(id, patch)
            .await
            .map_err(SyncError::durable)
    }

    /// Persist mutations already applied to `store`, all concurrently.
    ///
    /// `Create` writes the whole record (it is also used to restore
    /// snapshots), `Update` merges the patch and broadcasts the shape as it
    /// now stands in `store`, `Delete` removes it. Updates of shapes no
    /// longer in `store` are skipped. The first failure is returned after
    /// every write has settled.
    pub async fn persist_all(
        &self,
        store: &ObjectStore,
        mutations: &[Mutation],
    ) -> Result<(), SyncError> {
        let writes = mutations.iter().map(|mutation| async move {
            match mutation {
                Mutation::Create(shape) => self.save(shape).await,
                Mutation::Update { id, patch } => match store.get(id) {
                    Some(shape) => self.update(shape, patch).await,
                    None => Ok(()),
                },
                Mutation::Delete(id) => self.delete(id).await,
            }
        });
        join_all(writes).await.into_iter().collect::<Result<Vec<()>, _>>()?;
        Ok(())
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    pub fn durable(&self) -> &Arc<D> {
        &self.durable
    }

    pub fn realtime(&self) -> &Arc<R> {
        &self.realtime
    }
}
