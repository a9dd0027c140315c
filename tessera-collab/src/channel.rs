//! Contracts for the two data channels.
//!
//! ```text
//!                 ┌──────────────────────┐
//!   save/update ─►│ DurableStore         │  strongly consistent, read once
//!   delete        │ (memory, RocksDB)    │  at startup, then write-only
//!                 └──────────────────────┘
//!                 ┌──────────────────────┐
//!   put/remove ──►│ RealtimeChannel      │  low latency, whole-record
//!   subscribe ◄───│ (hub, relay client)  │  overwrite, full-set delivery
//!                 └──────────────────────┘
//! ```
//!
//! The realtime channel carries three namespaces of JSON records: shapes,
//! presence and cursors. Records armed with [`RealtimeChannel::arm_on_disconnect`]
//! are removed by the channel when this client's connection goes away.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_core::{Shape, ShapeMap, ShapePatch};
use tokio::sync::watch;

use crate::error::{ChannelError, StoreError};

/// Records of one namespace keyed by id.
pub type Records = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    Shapes,
    Presence,
    Cursors,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Shapes => "shapes",
            Namespace::Presence => "presence",
            Namespace::Cursors => "cursors",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Live view of a channel's data.
///
/// The first [`changed`](Subscription::changed) resolves immediately with
/// the current value; later calls wait for the next change. Dropping the
/// subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    pub fn new(mut rx: watch::Receiver<T>) -> Self {
        rx.mark_changed();
        Self { rx }
    }

    /// Wait for the next delivery. `None` once the channel is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Current value without waiting.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }
}

/// Strongly consistent long-term store.
pub trait DurableStore: Send + Sync + 'static {
    fn load_all(&self) -> impl Future<Output = Result<ShapeMap, StoreError>> + Send;

    /// Insert or overwrite a whole record.
    fn save(&self, shape: &Shape) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Merge `patch` into an existing record; [`StoreError::NotFound`] when
    /// there is none.
    fn update(
        &self,
        id: &str,
        patch: &ShapePatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a record; removing a missing record succeeds.
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Change feed of the full record set.
    fn subscribe(&self) -> Subscription<Arc<ShapeMap>>;
}

/// Low-latency, eventually consistent broadcast store.
pub trait RealtimeChannel: Send + Sync + 'static {
    /// Overwrite one record.
    fn put(
        &self,
        namespace: Namespace,
        key: &str,
        value: serde_json::Value,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    fn remove(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Full current set of `namespace`, then every change.
    fn subscribe(
        &self,
        namespace: Namespace,
    ) -> impl Future<Output = Result<Subscription<Arc<Records>>, ChannelError>> + Send;

    /// Remove `key` when this connection closes or its lease lapses.
    fn arm_on_disconnect(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    fn cancel_on_disconnect(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Keep the connection (or lease) alive.
    fn heartbeat(&self) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Observe reconnects; armed removals must be re-armed after one.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}
