//! # tessera-collab: lock-based shape synchronisation
//!
//! Keeps every participant's [`tessera_core::ObjectStore`] in step through
//! two channels: a durable store that survives restarts and a realtime
//! channel that fans changes out and tracks presence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   dual write   ┌──────────────┐
//! │ SessionController│ ─────────────► │ DurableStore │  Memory / RocksDB
//! │  (per user)      │                └──────────────┘
//! │  ObjectStore     │   put/remove   ┌──────────────┐
//! │  HistoryManager  │ ◄────────────► │ Realtime     │  Hub (in process)
//! │  Presence        │   snapshots    │ Channel      │  RelayClient ─► RelayServer
//! └──────────────────┘                └──────────────┘
//! ```
//!
//! Remote deliveries replace local state wholesale. Conflicts are avoided
//! with per-shape locks rather than merged.
//!
//! ## Modules
//!
//! - [`channel`]: the two channel contracts and the subscription handle
//! - [`storage`]: in-memory and RocksDB durable stores
//! - [`hub`]: in-process realtime channel with presence leases
//! - [`protocol`] / [`server`] / [`client`]: the WebSocket relay
//! - [`gateway`]: dual writes and startup reconciliation
//! - [`presence`]: online users, colors and cursors
//! - [`debounce`]: keyed debounce timers
//! - [`session`]: one user's editing session

pub mod channel;
pub mod client;
pub mod config;
pub mod debounce;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use channel::{ConnectionState, DurableStore, Namespace, RealtimeChannel, Records, Subscription};
pub use client::RelayClient;
pub use config::{ClientConfig, HubConfig, RelayConfig, SessionConfig, DEFAULT_PALETTE};
pub use debounce::Debouncer;
pub use error::{ChannelError, ProtocolError, StoreError, SyncError};
pub use gateway::{decode_records, PersistenceGateway, ReconcileReport};
pub use hub::{Hub, HubConnection, HubStats};
pub use presence::{CursorRecord, OnlineUser, OnlineUsers, PresenceRecord, PresenceService};
pub use protocol::RelayMessage;
pub use server::{RelayServer, RelayStats};
pub use session::{SessionController, SessionEvent};
pub use storage::{MemoryStore, RocksStore, StoreConfig};
