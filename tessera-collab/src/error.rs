//! Error types for the synchronisation layer.
//!
//! Lock conflicts are not errors; they surface as
//! [`tessera_core::UpdateOutcome::Locked`] or `Ok(false)` from the session.

use tessera_core::{CommandError, SelectionConflict, ShapeId};

/// Durable store failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Shape not found: {0}")]
    NotFound(ShapeId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Realtime channel failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Serialization(e.to_string())
    }
}

impl From<ProtocolError> for ChannelError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::ConnectionClosed => ChannelError::Closed,
            other => ChannelError::Serialization(other.to_string()),
        }
    }
}

/// Relay wire failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Errors surfaced by the gateway, presence service and session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// A dual write failed on at least one channel. `None` means that
    /// channel accepted the write.
    #[error("Write failed ({})", describe_write(.durable, .broadcast))]
    Write {
        durable: Option<StoreError>,
        broadcast: Option<ChannelError>,
    },

    #[error("Reconciliation failed: {0}")]
    Reconcile(String),

    #[error("Gateway already reconciled")]
    AlreadyReconciled,

    #[error("Presence error: {0}")]
    Presence(#[from] ChannelError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Selection aborted: {0}")]
    Selection(#[from] SelectionConflict),
}

fn describe_write(durable: &Option<StoreError>, broadcast: &Option<ChannelError>) -> String {
    match (durable, broadcast) {
        (Some(d), Some(b)) => format!("durable: {d}; broadcast: {b}"),
        (Some(d), None) => format!("durable: {d}"),
        (None, Some(b)) => format!("broadcast: {b}"),
        (None, None) => "no channel reported an error".to_string(),
    }
}

impl SyncError {
    pub fn durable(err: StoreError) -> Self {
        SyncError::Write {
            durable: Some(err),
            broadcast: None,
        }
    }

    pub fn broadcast(err: ChannelError) -> Self {
        SyncError::Write {
            durable: None,
            broadcast: Some(err),
        }
    }

    /// True when exactly one channel accepted the write.
    pub fn is_partial_write(&self) -> bool {
        matches!(
            self,
            SyncError::Write { durable, broadcast } if durable.is_some() != broadcast.is_some()
        )
    }
}
