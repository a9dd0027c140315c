//! Runtime configuration.
//!
//! Every struct has production defaults and a `for_testing()` constructor
//! with short windows so integration tests run in milliseconds.

use std::time::Duration;

use tessera_core::DEFAULT_HISTORY_LIMIT;

/// Ten well-separated colors handed out to participants in order.
pub const DEFAULT_PALETTE: [&str; 10] = [
    "#EF4444", "#F97316", "#EAB308", "#22C55E", "#14B8A6", "#3B82F6", "#6366F1", "#A855F7",
    "#EC4899", "#64748B",
];

/// Per-session timers and limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Undo depth
    pub history_limit: usize,
    /// Coalescing window for unlock calls
    pub unlock_debounce: Duration,
    /// Coalescing window for durable writes of drag frames
    pub durable_write_debounce: Duration,
    /// Minimum spacing between cursor writes (30 fps)
    pub cursor_interval: Duration,
    /// Presence lease renewal period
    pub heartbeat_interval: Duration,
    /// Colors assigned to participants
    pub palette: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            unlock_debounce: Duration::from_millis(100),
            durable_write_debounce: Duration::from_millis(300),
            cursor_interval: Duration::from_millis(33),
            heartbeat_interval: Duration::from_secs(5),
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn for_testing() -> Self {
        Self {
            unlock_debounce: Duration::from_millis(20),
            durable_write_debounce: Duration::from_millis(40),
            cursor_interval: Duration::from_millis(33),
            heartbeat_interval: Duration::from_millis(200),
            ..Self::default()
        }
    }
}

/// In-memory realtime hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Lease lifetime without a heartbeat before armed records are dropped
    pub lease_ttl: Duration,
    /// How often the reaper looks for expired leases
    pub reap_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(15),
            reap_interval: Duration::from_secs(1),
        }
    }
}

impl HubConfig {
    pub fn for_testing() -> Self {
        Self {
            lease_ttl: Duration::from_millis(150),
            reap_interval: Duration::from_millis(25),
        }
    }
}

/// Relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Change notification buffer per connection
    pub channel_capacity: usize,
    /// Connections beyond this are closed on accept
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            channel_capacity: 256,
            max_connections: 1024,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `TESSERA_RELAY_ADDR` and
    /// `TESSERA_RELAY_CAPACITY`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("TESSERA_RELAY_ADDR").filter(|a| !a.is_empty()) {
            config.bind_addr = addr;
        }
        if let Some(raw) = lookup("TESSERA_RELAY_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.channel_capacity = capacity,
                _ => log::warn!("Ignoring invalid TESSERA_RELAY_CAPACITY={raw}"),
            }
        }
        config
    }
}

/// Relay client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `ws://host:port`
    pub url: String,
    /// Display name sent in the handshake
    pub name: String,
    /// How long a request waits for its acknowledgement
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            request_timeout: Duration::from_secs(5),
        }
    }
}
