//! In-process realtime channel with lease-based disconnect hooks.
//!
//! A [`Hub`] holds the namespaces; each client talks to it through a
//! [`HubConnection`]. Every change replaces the namespace's `Arc<Records>`
//! in a `watch` channel, so subscribers always see the full current set.
//!
//! ```text
//!   HubConnection ──put/remove──► Hub ──watch──► Subscription (N clients)
//!         │                        │
//!         └──heartbeat──► Lease ◄──┴── reaper: lease older than TTL
//!                          │             → remove armed records
//!                          └── armed: {(namespace, key)}
//! ```
//!
//! There is no socket to notice a crash, so each connection holds a lease
//! that [`RealtimeChannel::heartbeat`] renews. A lease not renewed within
//! `lease_ttl` is reaped and its armed records removed. A heartbeat on a
//! reaped lease opens a fresh one and reports a reconnect, so presence is
//! re-armed the same way it is after a real network reconnect.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::channel::{ConnectionState, Namespace, RealtimeChannel, Records, Subscription};
use crate::config::HubConfig;
use crate::error::ChannelError;

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub writes: u64,
    pub expired_leases: u64,
    pub active_leases: usize,
}

struct Lease {
    renewed: Instant,
    armed: HashSet<(Namespace, String)>,
}

impl Lease {
    fn new() -> Self {
        Self {
            renewed: Instant::now(),
            armed: HashSet::new(),
        }
    }
}

#[derive(Default)]
struct HubState {
    namespaces: HashMap<Namespace, watch::Sender<Arc<Records>>>,
    leases: HashMap<Uuid, Lease>,
}

impl HubState {
    fn namespace(&mut self, namespace: Namespace) -> &watch::Sender<Arc<Records>> {
        self.namespaces
            .entry(namespace)
            .or_insert_with(|| watch::channel(Arc::new(Records::new())).0)
    }

    fn remove_record(&mut self, namespace: Namespace, key: &str) {
        self.namespace(namespace)
            .send_if_modified(|records| Arc::make_mut(records).remove(key).is_some());
    }

    /// Drop a lease and remove everything it armed.
    fn close_lease(&mut self, lease_id: Uuid) -> usize {
        let Some(lease) = self.leases.remove(&lease_id) else {
            return 0;
        };
        let removed = lease.armed.len();
        for (namespace, key) in lease.armed {
            self.remove_record(namespace, &key);
        }
        removed
    }
}

/// Shared realtime state for every client in the process.
pub struct Hub {
    state: RwLock<HubState>,
    config: HubConfig,
    writes: AtomicU64,
    expired: AtomicU64,
}

impl Hub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HubState::default()),
            config,
            writes: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        })
    }

    /// Open a client connection with a fresh lease.
    pub async fn connect(self: &Arc<Self>) -> HubConnection {
        let lease_id = Uuid::new_v4();
        self.state.write().await.leases.insert(lease_id, Lease::new());
        let (state, _) = watch::channel(ConnectionState::Connected);
        log::debug!("Hub lease {lease_id} opened");
        HubConnection {
            hub: self.clone(),
            lease: RwLock::new(lease_id),
            state,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Remove every lease older than the TTL. Returns how many expired.
    pub async fn reap_expired(&self) -> usize {
        let ttl = self.config.lease_ttl;
        let mut state = self.state.write().await;
        let expired: Vec<Uuid> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.renewed.elapsed() > ttl)
            .map(|(id, _)| *id)
            .collect();
        for lease_id in &expired {
            let removed = state.close_lease(*lease_id);
            log::warn!("Hub lease {lease_id} expired, removed {removed} armed records");
        }
        self.expired.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Run [`reap_expired`](Hub::reap_expired) every `reap_interval`.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(hub.config.reap_interval);
            loop {
                tick.tick().await;
                hub.reap_expired().await;
            }
        })
    }

    /// Current records of a namespace.
    pub async fn records(&self, namespace: Namespace) -> Arc<Records> {
        self.state.write().await.namespace(namespace).borrow().clone()
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            writes: self.writes.load(Ordering::Relaxed),
            expired_leases: self.expired.load(Ordering::Relaxed),
            active_leases: self.state.read().await.leases.len(),
        }
    }
}

/// One client's handle on a [`Hub`].
pub struct HubConnection {
    hub: Arc<Hub>,
    lease: RwLock<Uuid>,
    state: watch::Sender<ConnectionState>,
    fail_writes: AtomicBool,
}

impl HubConnection {
    /// Reject every write with [`ChannelError::Rejected`] until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Close this connection's lease now, as a dropped socket would.
    /// Armed records are removed immediately.
    pub async fn close(&self) {
        let lease_id = *self.lease.read().await;
        let removed = self.hub.state.write().await.close_lease(lease_id);
        self.state.send_replace(ConnectionState::Disconnected);
        log::info!("Hub lease {lease_id} closed, removed {removed} armed records");
    }

    /// Close the current lease and open a new one.
    pub async fn reconnect(&self) {
        self.state.send_replace(ConnectionState::Reconnecting);
        let mut lease = self.lease.write().await;
        let mut state = self.hub.state.write().await;
        state.close_lease(*lease);
        *lease = Uuid::new_v4();
        state.leases.insert(*lease, Lease::new());
        drop(state);
        log::info!("Hub connection moved to lease {}", *lease);
        self.state.send_replace(ConnectionState::Connected);
    }

    fn check_writable(&self) -> Result<(), ChannelError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected("writes disabled".into()));
        }
        Ok(())
    }

    async fn with_lease<T>(
        &self,
        f: impl FnOnce(&mut Lease) -> T,
    ) -> Result<T, ChannelError> {
        let lease_id = *self.lease.read().await;
        let mut state = self.hub.state.write().await;
        let lease = state.leases.get_mut(&lease_id).ok_or(ChannelError::Closed)?;
        Ok(f(lease))
    }
}

impl RealtimeChannel for HubConnection {
    async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ChannelError> {
        self.check_writable()?;
        let mut state = self.hub.state.write().await;
        state.namespace(namespace).send_modify(|records| {
            Arc::make_mut(records).insert(key.to_string(), value);
        });
        self.hub.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), ChannelError> {
        self.check_writable()?;
        self.hub.state.write().await.remove_record(namespace, key);
        self.hub.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(
        &self,
        namespace: Namespace,
    ) -> Result<Subscription<Arc<Records>>, ChannelError> {
        let mut state = self.hub.state.write().await;
        Ok(Subscription::new(state.namespace(namespace).subscribe()))
    }

    async fn arm_on_disconnect(&self, namespace: Namespace, key: &str) -> Result<(), ChannelError> {
        self.with_lease(|lease| lease.armed.insert((namespace, key.to_string())))
            .await
            .map(|_| ())
    }

    async fn cancel_on_disconnect(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<(), ChannelError> {
        self.with_lease(|lease| lease.armed.remove(&(namespace, key.to_string())))
            .await
            .map(|_| ())
    }

    async fn heartbeat(&self) -> Result<(), ChannelError> {
        let renewed = self
            .with_lease(|lease| lease.renewed = Instant::now())
            .await;
        if renewed.is_ok() {
            return Ok(());
        }
        // Lease was reaped while we were silent.
        log::warn!("Hub lease lost, reconnecting");
        self.reconnect().await;
        Ok(())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_is_visible_to_other_connections() {
        let hub = Hub::new(HubConfig::for_testing());
        let a = hub.connect().await;
        let b = hub.connect().await;
        let mut sub = b.subscribe(Namespace::Shapes).await.unwrap();
        assert!(sub.changed().await.unwrap().is_empty());

        a.put(Namespace::Shapes, "s1", json!({"id": "s1"})).await.unwrap();
        let records = sub.changed().await.unwrap();
        assert_eq!(records["s1"]["id"], "s1");

        a.remove(Namespace::Shapes, "s1").await.unwrap();
        assert!(sub.changed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_removes_armed_records() {
        let hub = Hub::new(HubConfig::for_testing());
        let conn = hub.connect().await;
        conn.put(Namespace::Presence, "alice", json!({"color": "#fff"})).await.unwrap();
        conn.put(Namespace::Presence, "keep", json!({})).await.unwrap();
        conn.arm_on_disconnect(Namespace::Presence, "alice").await.unwrap();

        conn.close().await;
        let records = hub.records(Namespace::Presence).await;
        assert!(!records.contains_key("alice"));
        assert!(records.contains_key("keep"));
        assert_eq!(*conn.connection_state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_cancelled_hook_does_not_fire() {
        let hub = Hub::new(HubConfig::for_testing());
        let conn = hub.connect().await;
        conn.put(Namespace::Cursors, "bob", json!({"x": 1})).await.unwrap();
        conn.arm_on_disconnect(Namespace::Cursors, "bob").await.unwrap();
        conn.cancel_on_disconnect(Namespace::Cursors, "bob").await.unwrap();

        conn.close().await;
        assert!(hub.records(Namespace::Cursors).await.contains_key("bob"));
    }

    #[tokio::test]
    async fn test_lease_expiry_and_heartbeat() {
        let hub = Hub::new(HubConfig::for_testing());
        let live = hub.connect().await;
        let silent = hub.connect().await;
        for (conn, key) in [(&live, "live"), (&silent, "silent")] {
            conn.put(Namespace::Presence, key, json!({})).await.unwrap();
            conn.arm_on_disconnect(Namespace::Presence, key).await.unwrap();
        }

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            live.heartbeat().await.unwrap();
        }
        assert_eq!(hub.reap_expired().await, 1);

        let records = hub.records(Namespace::Presence).await;
        assert!(records.contains_key("live"));
        assert!(!records.contains_key("silent"));
        assert_eq!(hub.stats().await.expired_leases, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_after_expiry_reports_reconnect() {
        let hub = Hub::new(HubConfig::for_testing());
        let conn = hub.connect().await;
        let mut state = conn.connection_state();
        tokio::time::sleep(Duration::from_millis(200)).await;
        hub.reap_expired().await;

        conn.heartbeat().await.unwrap();
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
        // Arming works again on the new lease.
        conn.arm_on_disconnect(Namespace::Presence, "x").await.unwrap();
    }

    #[tokio::test]
    async fn test_reaper_task() {
        let hub = Hub::new(HubConfig::for_testing());
        let conn = hub.connect().await;
        conn.put(Namespace::Cursors, "c", json!({})).await.unwrap();
        conn.arm_on_disconnect(Namespace::Cursors, "c").await.unwrap();

        let reaper = hub.spawn_reaper();
        tokio::time::sleep(Duration::from_millis(300)).await;
        reaper.abort();
        assert!(hub.records(Namespace::Cursors).await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_switch() {
        let hub = Hub::new(HubConfig::for_testing());
        let conn = hub.connect().await;
        conn.set_fail_writes(true);
        assert!(matches!(
            conn.put(Namespace::Shapes, "s", json!({})).await,
            Err(ChannelError::Rejected(_))
        ));
    }
}
