//! One user's editing session.
//!
//! ```text
//!   start ── reconcile ── history.push(initial) ── presence.join
//!     │
//!     ▼
//!   local action ──► ObjectStore (optimistic) ──► gateway dual write
//!                          ▲                          │ failed
//!                          └──── restore snapshot ◄───┘
//!                                                     │ ok
//!                                                     ▼
//!                                          history.push (one per gesture)
//!
//!   next_event: remote feed │ unlock debounce │ durable debounce │ heartbeat │ reconnect
//!
//!   shutdown ── flush debouncers ── unlock owned ── presence.leave
//! ```
//!
//! The session owns everything it drives; nothing here is global. All
//! mutation goes through `&mut self`, so object store changes never race.

use std::sync::Arc;

use tessera_core::{
    apply_mutation, plan_commands, shapes_in_box, Aabb, Command, CommandContext, CommandError,
    HistoryManager, Mutation, ObjectStore, Shape, ShapeId, ShapeMap, ShapePatch, ShapeSpec,
    Snapshot, UserId,
};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::channel::{ConnectionState, DurableStore, Namespace, RealtimeChannel, Records, Subscription};
use crate::config::SessionConfig;
use crate::debounce::Debouncer;
use crate::error::SyncError;
use crate::gateway::{decode_records, PersistenceGateway, ReconcileReport};
use crate::presence::{remote_cursors, CursorRecord, OnlineUsers, PresenceService};

/// Offset applied to duplicated shapes.
pub const DUPLICATE_OFFSET: f64 = 20.0;

/// What [`SessionController::next_event`] handled.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The realtime shape set replaced the local store
    RemoteChanged { shapes: usize },
    /// Coalesced unlocks were written
    UnlocksFlushed(Vec<ShapeId>),
    /// Debounced drag frames reached the durable store
    DurableFlushed(Vec<ShapeId>),
    /// The presence lease was renewed
    Heartbeat,
    /// The connection came back and presence was re-armed
    Reconnected,
    ConnectionLost(ConnectionState),
    /// The realtime feed ended; no more remote changes will arrive
    FeedClosed,
}

pub struct SessionController<D, R> {
    config: SessionConfig,
    user_id: UserId,
    color: String,
    store: ObjectStore,
    history: HistoryManager,
    gateway: PersistenceGateway<D, R>,
    presence: PresenceService<R>,
    remote: Subscription<Arc<Records>>,
    connection: watch::Receiver<ConnectionState>,
    selection: Vec<ShapeId>,
    pending_unlocks: Debouncer<ShapeId, ()>,
    pending_durable: Debouncer<ShapeId, ShapePatch>,
    heartbeat: Interval,
    report: ReconcileReport,
}

impl<D: DurableStore, R: RealtimeChannel> SessionController<D, R> {
    /// Reconcile, record the initial history state and join presence.
    /// No session exists if any step fails.
    pub async fn start(
        config: SessionConfig,
        durable: Arc<D>,
        realtime: Arc<R>,
        user_id: &str,
        display_name: &str,
    ) -> Result<Self, SyncError> {
        let mut store = ObjectStore::new();
        let mut gateway = PersistenceGateway::new(durable, realtime.clone());
        let (report, remote) = gateway.reconcile(&mut store).await?;

        let mut history = HistoryManager::new(config.history_limit);
        history.push_state(store.snapshot());

        let mut presence = PresenceService::new(
            realtime.clone(),
            config.palette.clone(),
            config.cursor_interval,
        );
        let color = presence.join(user_id, display_name).await?;

        let mut heartbeat = interval_at(
            Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("Session started for {display_name} ({user_id}) with {} shapes", store.len());
        Ok(Self {
            pending_unlocks: Debouncer::new(config.unlock_debounce),
            pending_durable: Debouncer::new(config.durable_write_debounce),
            connection: realtime.connection_state(),
            config,
            user_id: user_id.to_string(),
            color,
            store,
            history,
            gateway,
            presence,
            remote,
            selection: Vec::new(),
            heartbeat,
            report,
        })
    }

    // ───────────────────────────────────────────────────────────────
    // Persistence helpers
    // ───────────────────────────────────────────────────────────────

    /// Write mutations already applied locally; on failure put `before`
    /// back and return the error.
    async fn persist_or_restore(
        &mut self,
        before: Snapshot,
        mutations: &[Mutation],
    ) -> Result<(), SyncError> {
        if let Err(e) = self.gateway.persist_all(&self.store, mutations).await {
            log::warn!("Rolling back {} local changes: {e}", mutations.len());
            self.store.set_all((*before).clone());
            return Err(e);
        }
        Ok(())
    }

    /// Apply, persist, and optionally record one history entry.
    async fn apply_and_persist(
        &mut self,
        mutations: &[Mutation],
        record: bool,
    ) -> Result<(), SyncError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let before = self.store.snapshot();
        for mutation in mutations {
            apply_mutation(&mut self.store, mutation, &self.user_id);
        }
        self.persist_or_restore(before, mutations).await?;
        if record {
            self.history.push_state(self.store.snapshot());
        }
        Ok(())
    }

    fn editable(&self, id: &str) -> bool {
        self.store.contains(id) && !self.store.is_locked_by_other(id, &self.user_id)
    }

    fn holds_lock(&self, id: &str) -> bool {
        self.store
            .get(id)
            .is_some_and(|s| s.locked_by.as_deref() == Some(self.user_id.as_str()))
    }

    // ───────────────────────────────────────────────────────────────
    // Shape operations
    // ───────────────────────────────────────────────────────────────

    /// Create a shape from `spec` with a fresh id on top of the z-order.
    pub async fn create_shape(&mut self, spec: ShapeSpec) -> Result<ShapeId, SyncError> {
        let shape = spec
            .into_shape(Uuid::new_v4().to_string(), &self.user_id, self.store.next_z_index())
            .map_err(CommandError::from)?;
        let id = shape.id.clone();
        self.apply_and_persist(&[Mutation::Create(shape)], true).await?;
        log::debug!("Created {id}");
        Ok(id)
    }

    /// Finish a gesture: merge any debounced frames with `patch`, write
    /// both channels and record history. `Ok(false)` when the shape is
    /// missing or held by someone else.
    pub async fn commit_update(&mut self, id: &str, patch: ShapePatch) -> Result<bool, SyncError> {
        if !self.editable(id) {
            return Ok(false);
        }
        let mut durable_patch = self.pending_durable.take(&id.to_string()).unwrap_or_default();
        durable_patch.merge(&patch);
        let mutation = Mutation::Update {
            id: id.to_string(),
            patch: durable_patch,
        };
        self.apply_and_persist(&[mutation], true).await?;
        Ok(true)
    }

    /// Intermediate frame: broadcast now, durable write debounced, no
    /// history.
    pub async fn preview_update(&mut self, id: &str, patch: ShapePatch) -> Result<bool, SyncError> {
        if !self.editable(id) {
            return Ok(false);
        }
        let before = self.store.snapshot();
        self.store.update(id, &self.user_id, &patch);
        let Some(shape) = self.store.get(id) else {
            return Ok(false);
        };
        if let Err(e) = self.gateway.broadcast_only(shape).await {
            self.store.set_all((*before).clone());
            return Err(e);
        }
        self.pending_durable
            .merge_with(id.to_string(), patch, |mut pending, newer| {
                pending.merge(&newer);
                pending
            });
        Ok(true)
    }

    /// Move shapes by `(dx, dy)`. Returns how many moved.
    pub async fn nudge(&mut self, ids: &[ShapeId], dx: f64, dy: f64) -> Result<usize, SyncError> {
        let mutations: Vec<Mutation> = ids
            .iter()
            .filter(|id| self.editable(id))
            .filter_map(|id| self.store.get(id))
            .map(|shape| Mutation::Update {
                id: shape.id.clone(),
                patch: shape.translated(dx, dy),
            })
            .collect();
        self.apply_and_persist(&mutations, true).await?;
        Ok(mutations.len())
    }

    /// Copy shapes with new ids, offset and stacked on top, unlocked.
    pub async fn duplicate(&mut self, ids: &[ShapeId]) -> Result<Vec<ShapeId>, SyncError> {
        let mut next_z = self.store.next_z_index();
        let mut mutations = Vec::new();
        for shape in ids.iter().filter_map(|id| self.store.get(id)) {
            let mut copy = Shape {
                id: Uuid::new_v4().to_string(),
                created_by: self.user_id.clone(),
                locked_by: None,
                z_index: next_z,
                ..shape.clone()
            };
            copy.apply_patch(&shape.translated(DUPLICATE_OFFSET, DUPLICATE_OFFSET));
            next_z += 1;
            mutations.push(Mutation::Create(copy));
        }
        self.apply_and_persist(&mutations, true).await?;
        Ok(mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::Create(shape) => Some(shape.id.clone()),
                _ => None,
            })
            .collect())
    }

    /// Delete shapes not held by others. Returns how many went.
    pub async fn delete_shapes(&mut self, ids: &[ShapeId]) -> Result<usize, SyncError> {
        let doomed: Vec<ShapeId> = ids.iter().filter(|id| self.editable(id)).cloned().collect();
        let mutations: Vec<Mutation> = doomed.iter().cloned().map(Mutation::Delete).collect();
        self.apply_and_persist(&mutations, true).await?;
        for id in &doomed {
            self.pending_durable.cancel(id);
            self.pending_unlocks.cancel(id);
        }
        self.selection.retain(|id| !doomed.contains(id));
        Ok(doomed.len())
    }

    pub async fn bring_to_front(&mut self, id: &str) -> Result<bool, SyncError> {
        if !self.editable(id) {
            return Ok(false);
        }
        let patch = ShapePatch {
            z_index: Some(self.store.next_z_index()),
            ..ShapePatch::default()
        };
        self.commit_update(id, patch).await
    }

    /// Run structured commands as one history entry. Returns the number of
    /// shapes touched.
    pub async fn apply_commands(&mut self, commands: &[Command]) -> Result<usize, SyncError> {
        let ctx = CommandContext {
            user_id: &self.user_id,
            selection: &self.selection,
        };
        let mutations = plan_commands(&self.store, commands, ctx)?;
        self.apply_and_persist(&mutations, true).await?;
        log::info!("Applied {} commands ({} changes)", commands.len(), mutations.len());
        Ok(mutations.len())
    }

    // ───────────────────────────────────────────────────────────────
    // Locks and selection
    // ───────────────────────────────────────────────────────────────

    /// Take the lock on `id`. `Ok(false)` when someone else holds it.
    pub async fn lock(&mut self, id: &str) -> Result<bool, SyncError> {
        let had_pending = self.pending_unlocks.cancel(&id.to_string()).is_some();
        if self.holds_lock(id) {
            if had_pending {
                log::debug!("Lock on {id} kept, pending unlock cancelled");
            }
            return Ok(true);
        }
        if !self.editable(id) {
            return Ok(false);
        }
        let mutation = Mutation::Update {
            id: id.to_string(),
            patch: ShapePatch::lock(self.user_id.clone()),
        };
        self.apply_and_persist(&[mutation], false).await?;
        Ok(true)
    }

    /// Release the lock on `id` after the unlock debounce window.
    pub fn unlock(&mut self, id: &str) {
        if self.holds_lock(id) {
            self.pending_unlocks.push(id.to_string(), ());
        }
    }

    pub fn has_pending_unlock(&self, id: &str) -> bool {
        self.pending_unlocks.is_pending(&id.to_string())
    }

    async fn release(&mut self, ids: Vec<ShapeId>) -> Result<Vec<ShapeId>, SyncError> {
        let mine: Vec<ShapeId> = ids.into_iter().filter(|id| self.holds_lock(id)).collect();
        let mutations: Vec<Mutation> = mine
            .iter()
            .map(|id| Mutation::Update {
                id: id.clone(),
                patch: ShapePatch::unlock(),
            })
            .collect();
        self.apply_and_persist(&mutations, false).await?;
        if !mine.is_empty() {
            log::debug!("Released {} coalesced unlocks", mine.len());
        }
        Ok(mine)
    }

    /// Select and batch-lock every shape under `marquee`. The whole
    /// selection aborts if any hit is held by someone else.
    pub async fn select_in_box(&mut self, marquee: Aabb) -> Result<Vec<ShapeId>, SyncError> {
        let hits = shapes_in_box(self.store.iter(), &marquee, &self.user_id)?;

        let previous = std::mem::take(&mut self.selection);
        for id in previous.iter().filter(|id| !hits.contains(id)) {
            self.unlock(id);
        }
        for id in &hits {
            self.pending_unlocks.cancel(id);
        }

        let to_lock: Vec<ShapeId> = hits.iter().filter(|id| !self.holds_lock(id)).cloned().collect();
        if !to_lock.is_empty() {
            let before = self.store.snapshot();
            self.store.batch_lock(&to_lock, &self.user_id);
            let mutations: Vec<Mutation> = to_lock
                .iter()
                .map(|id| Mutation::Update {
                    id: id.clone(),
                    patch: ShapePatch::lock(self.user_id.clone()),
                })
                .collect();
            self.persist_or_restore(before, &mutations).await?;
        }
        log::debug!("Marquee selected {} shapes", hits.len());
        self.selection = hits.clone();
        Ok(hits)
    }

    /// Drop the selection; its locks are released after the debounce.
    pub fn clear_selection(&mut self) {
        for id in std::mem::take(&mut self.selection) {
            self.unlock(&id);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // History
    // ───────────────────────────────────────────────────────────────

    /// Roll back one action. `Ok(false)` with nothing to undo.
    ///
    /// A successful restore also drops the selection.
    pub async fn undo(&mut self) -> Result<bool, SyncError> {
        let Some(target) = self.history.undo() else {
            return Ok(false);
        };
        if let Err(e) = self.restore(&target).await {
            self.history.redo();
            return Err(e);
        }
        self.clear_selection();
        Ok(true)
    }

    pub async fn redo(&mut self) -> Result<bool, SyncError> {
        let Some(target) = self.history.redo() else {
            return Ok(false);
        };
        if let Err(e) = self.restore(&target).await {
            self.history.undo();
            return Err(e);
        }
        self.clear_selection();
        Ok(true)
    }

    /// Bring the live store to `target` through the network.
    async fn restore(&mut self, target: &ShapeMap) -> Result<(), SyncError> {
        let mutations = restore_mutations(&self.store, target, &self.user_id);
        log::debug!("Restoring snapshot: {} changes", mutations.len());
        self.apply_and_persist(&mutations, false).await
    }

    // ───────────────────────────────────────────────────────────────
    // Presence
    // ───────────────────────────────────────────────────────────────

    /// Rate-limited cursor broadcast. `Ok(false)` when throttled.
    pub async fn update_cursor(&mut self, x: f64, y: f64) -> Result<bool, SyncError> {
        Ok(self.presence.update_cursor(x, y).await?)
    }

    pub async fn online_users(&self) -> Result<OnlineUsers, SyncError> {
        Ok(self.presence.list_online().await?)
    }

    /// Everyone else's cursor.
    pub async fn cursors(&self) -> Result<Vec<(UserId, CursorRecord)>, SyncError> {
        let records = self
            .gateway
            .realtime()
            .subscribe(Namespace::Cursors)
            .await?
            .current();
        Ok(remote_cursors(&records, &self.user_id))
    }

    // ───────────────────────────────────────────────────────────────
    // Event loop
    // ───────────────────────────────────────────────────────────────

    /// Wait for and handle the next remote change, timer or connection
    /// event.
    pub async fn next_event(&mut self) -> Result<SessionEvent, SyncError> {
        tokio::select! {
            records = self.remote.changed() => match records {
                Some(records) => Ok(self.apply_remote(&records)),
                None => Ok(SessionEvent::FeedClosed),
            },

            _ = self.pending_unlocks.wait() => {
                let due = self.pending_unlocks.take_due().into_iter().map(|(id, _)| id).collect();
                Ok(SessionEvent::UnlocksFlushed(self.release(due).await?))
            }

            _ = self.pending_durable.wait() => {
                let due = self.pending_durable.take_due();
                Ok(SessionEvent::DurableFlushed(self.flush_durable(due).await?))
            }

            _ = self.heartbeat.tick() => {
                self.presence.heartbeat().await?;
                Ok(SessionEvent::Heartbeat)
            }

            changed = self.connection.changed() => {
                if changed.is_err() {
                    return Ok(SessionEvent::FeedClosed);
                }
                let state = *self.connection.borrow_and_update();
                if state == ConnectionState::Connected {
                    self.presence.rearm().await?;
                    Ok(SessionEvent::Reconnected)
                } else {
                    log::warn!("Realtime connection {state:?}");
                    Ok(SessionEvent::ConnectionLost(state))
                }
            }
        }
    }

    /// Remote wins: the realtime set replaces the local store.
    fn apply_remote(&mut self, records: &Records) -> SessionEvent {
        let shapes = decode_records(records);
        let count = shapes.len();
        log::debug!("Remote delivery: {count} shapes");
        self.store.set_all(shapes);
        let store = &self.store;
        self.selection.retain(|id| store.contains(id));
        SessionEvent::RemoteChanged { shapes: count }
    }

    async fn flush_durable(
        &mut self,
        entries: Vec<(ShapeId, ShapePatch)>,
    ) -> Result<Vec<ShapeId>, SyncError> {
        let mut flushed = Vec::new();
        let mut first_err = None;
        for (id, patch) in entries {
            if !self.store.contains(&id) {
                continue;
            }
            match self.gateway.durable_update(&id, &patch).await {
                Ok(()) => flushed.push(id),
                Err(e) => {
                    log::warn!("Debounced durable write of {id} failed: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Flush timers, release owned locks and leave presence. Every step
    /// runs; the first error is returned.
    pub async fn shutdown(mut self) -> Result<(), SyncError> {
        let mut first_err: Option<SyncError> = None;

        let durable = self.pending_durable.flush();
        if let Err(e) = self.flush_durable(durable).await {
            first_err.get_or_insert(e);
        }
        let unlocks = self.pending_unlocks.flush().into_iter().map(|(id, _)| id).collect();
        if let Err(e) = self.release(unlocks).await {
            first_err.get_or_insert(e);
        }
        if let Err(e) = self
            .gateway
            .unlock_all_owned_by(&mut self.store, &self.user_id)
            .await
        {
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.presence.leave().await {
            first_err.get_or_insert(e.into());
        }

        log::info!("Session for {} shut down", self.user_id);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn selection(&self) -> &[ShapeId] {
        &self.selection
    }

    pub fn report(&self) -> ReconcileReport {
        self.report
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn gateway(&self) -> &PersistenceGateway<D, R> {
        &self.gateway
    }
}

/// Mutations that turn `live` into `target` without touching anyone
/// else's locks.
///
/// Shapes in both keep their live lock holder. Shapes held by another user
/// are neither changed nor deleted. Shapes only in `target` come back
/// unlocked.
pub fn restore_mutations(live: &ObjectStore, target: &ShapeMap, user_id: &str) -> Vec<Mutation> {
    let mut mutations = Vec::new();
    for (id, snapshot_shape) in target {
        match live.get(id) {
            Some(current) if current.is_locked_by_other(user_id) => {}
            Some(current) => {
                let restored = Shape {
                    locked_by: current.locked_by.clone(),
                    ..snapshot_shape.clone()
                };
                if restored != *current {
                    mutations.push(Mutation::Create(restored));
                }
            }
            None => mutations.push(Mutation::Create(Shape {
                locked_by: None,
                ..snapshot_shape.clone()
            })),
        }
    }
    for current in live.iter() {
        if !target.contains_key(&current.id) && !current.is_locked_by_other(user_id) {
            mutations.push(Mutation::Delete(current.id.clone()));
        }
    }
    mutations
}
