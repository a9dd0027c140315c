//! Binary protocol between relay clients and the relay server.
//!
//! Every frame is one bincode-encoded [`RelayMessage`] in a WebSocket binary
//! message. Record values travel as JSON text so the server never needs to
//! know the record schema.
//!
//! ```text
//!   client                                   server
//!     │── Hello{client_id, name} ──────────────►│
//!     │── Subscribe{req, ns} ──────────────────►│
//!     │◄─────────────── Snapshot{ns, records} ──│  full set
//!     │◄──────────────────────────── Ack{req} ──│
//!     │── Put{req, ns, key, json} ─────────────►│
//!     │◄──────────────────────────── Ack{req} ──│
//!     │◄─────────────── Snapshot{ns, records} ──│  every change, every subscriber
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::{Namespace, Records};
use crate::error::ProtocolError;

/// Request correlation id, unique per client connection.
pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// First frame on a connection
    Hello { client_id: Uuid, name: String },
    Put {
        request_id: RequestId,
        namespace: Namespace,
        key: String,
        json: String,
    },
    Remove {
        request_id: RequestId,
        namespace: Namespace,
        key: String,
    },
    /// Remove `key` when this connection closes
    ArmOnDisconnect {
        request_id: RequestId,
        namespace: Namespace,
        key: String,
    },
    CancelOnDisconnect {
        request_id: RequestId,
        namespace: Namespace,
        key: String,
    },
    Subscribe {
        request_id: RequestId,
        namespace: Namespace,
    },
    /// Full current set of a namespace, as `(key, json)` pairs
    Snapshot {
        namespace: Namespace,
        records: Vec<(String, String)>,
    },
    Ack { request_id: RequestId },
    Nack { request_id: RequestId, reason: String },
    Ping { request_id: RequestId },
    Pong { request_id: RequestId },
}

impl RelayMessage {
    pub fn put(
        request_id: RequestId,
        namespace: Namespace,
        key: impl Into<String>,
        value: &serde_json::Value,
    ) -> Self {
        RelayMessage::Put {
            request_id,
            namespace,
            key: key.into(),
            json: value.to_string(),
        }
    }

    /// Build a snapshot frame from a namespace's records.
    pub fn snapshot(namespace: Namespace, records: &Records) -> Self {
        RelayMessage::Snapshot {
            namespace,
            records: records
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect(),
        }
    }

    /// The request this frame answers or carries, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            RelayMessage::Put { request_id, .. }
            | RelayMessage::Remove { request_id, .. }
            | RelayMessage::ArmOnDisconnect { request_id, .. }
            | RelayMessage::CancelOnDisconnect { request_id, .. }
            | RelayMessage::Subscribe { request_id, .. }
            | RelayMessage::Ack { request_id }
            | RelayMessage::Nack { request_id, .. }
            | RelayMessage::Ping { request_id }
            | RelayMessage::Pong { request_id } => Some(*request_id),
            RelayMessage::Hello { .. } | RelayMessage::Snapshot { .. } => None,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }
}

/// Parse snapshot pairs back into records. Entries that are not valid JSON
/// are dropped with a warning.
pub fn parse_records(records: Vec<(String, String)>) -> Records {
    records
        .into_iter()
        .filter_map(|(key, json)| match serde_json::from_str(&json) {
            Ok(value) => Some((key, value)),
            Err(e) => {
                log::warn!("Dropping unparseable relay record {key}: {e}");
                None
            }
        })
        .collect()
}
