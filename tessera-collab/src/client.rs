//! WebSocket client for the relay server.
//!
//! Implements [`RealtimeChannel`] over a relay connection:
//! - every request carries an id and waits for its `Ack`/`Nack`
//! - `Snapshot` frames replace the local copy of a namespace, which
//!   subscribers observe through a `watch` channel
//! - [`RelayClient::reconnect`] opens a fresh socket and re-subscribes;
//!   armed removals are per connection, so presence must re-arm after it
//!
//! ```text
//!  request() ──► outgoing mpsc ──► writer task ──► ws
//!      ▲                                            │
//!      └── pending[req] ◄── reader task ◄───────────┘
//!                               └──► namespaces[ns] (watch)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::channel::{ConnectionState, Namespace, RealtimeChannel, Records, Subscription};
use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::protocol::{parse_records, RelayMessage, RequestId};

type Reply = oneshot::Sender<Result<(), ChannelError>>;

/// State shared with the reader task.
struct Shared {
    pending: Mutex<HashMap<RequestId, Reply>>,
    namespaces: Mutex<HashMap<Namespace, watch::Sender<Arc<Records>>>>,
    state: watch::Sender<ConnectionState>,
    /// Bumped for every socket; a reader only reports on its own socket
    generation: AtomicU64,
}

impl Shared {
    /// Resolve every outstanding request with [`ChannelError::Closed`].
    async fn fail_pending(&self) {
        let drained: Vec<Reply> = self.pending.lock().await.drain().map(|(_, tx)| tx).collect();
        for reply in drained {
            let _ = reply.send(Err(ChannelError::Closed));
        }
    }
}

struct Link {
    outgoing: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Relay connection implementing the realtime channel contract.
pub struct RelayClient {
    config: ClientConfig,
    client_id: Uuid,
    next_request: AtomicU64,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
}

impl RelayClient {
    /// Connect and say hello.
    pub async fn connect(config: ClientConfig) -> Result<Self, ChannelError> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let client = Self {
            config,
            client_id: Uuid::new_v4(),
            next_request: AtomicU64::new(1),
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                namespaces: Mutex::new(HashMap::new()),
                state,
                generation: AtomicU64::new(0),
            }),
            link: Mutex::new(None),
        };
        client.open_link().await?;
        client.shared.state.send_replace(ConnectionState::Connected);
        Ok(client)
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Replace the socket, re-subscribe to every followed namespace and
    /// report `Reconnecting` then `Connected`.
    pub async fn reconnect(&self) -> Result<(), ChannelError> {
        self.shared.state.send_replace(ConnectionState::Reconnecting);
        self.drop_link(false).await;
        if let Err(e) = self.open_link().await {
            self.shared.state.send_replace(ConnectionState::Disconnected);
            return Err(e);
        }

        let namespaces: Vec<Namespace> = self.shared.namespaces.lock().await.keys().copied().collect();
        for namespace in namespaces {
            self.request(|request_id| RelayMessage::Subscribe { request_id, namespace })
                .await?;
        }
        log::info!("Reconnected to {} as {}", self.config.url, self.config.name);
        self.shared.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    /// Graceful close: flush queued frames, then a close frame.
    pub async fn close(&self) {
        self.drop_link(true).await;
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    /// Drop the socket without a close frame, as a crashed process would.
    pub async fn abort(&self) {
        self.drop_link(false).await;
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    async fn open_link(&self) -> Result<(), ChannelError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| {
                log::error!("Failed to connect to {}: {e}", self.config.url);
                ChannelError::Closed
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Writer task: forward outgoing frames; closing the channel closes the socket.
        let (outgoing, mut out_rx) = mpsc::channel::<Message>(256);
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_writer.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: route replies and snapshots.
        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match RelayMessage::decode(&data) {
                        Ok(relay_msg) => route(&shared, relay_msg).await,
                        Err(e) => log::warn!("Dropping undecodable relay frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            if shared.generation.load(Ordering::SeqCst) == generation {
                log::warn!("Relay connection lost");
                shared.state.send_replace(ConnectionState::Disconnected);
                shared.fail_pending().await;
            }
        });

        *self.link.lock().await = Some(Link {
            outgoing,
            reader,
            writer,
        });

        let hello = RelayMessage::Hello {
            client_id: self.client_id,
            name: self.config.name.clone(),
        };
        self.send(&hello).await?;
        log::info!("Connected to relay {} as {}", self.config.url, self.config.name);
        Ok(())
    }

    /// Tear down the current socket. `graceful` lets the writer flush and
    /// send a close frame; otherwise both tasks are aborted.
    async fn drop_link(&self, graceful: bool) {
        let Some(link) = self.link.lock().await.take() else {
            return;
        };
        // Orphan the reader so it does not report on a socket we dropped.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if graceful {
            drop(link.outgoing);
            let _ = link.writer.await;
            link.reader.abort();
        } else {
            link.reader.abort();
            link.writer.abort();
        }
        self.shared.fail_pending().await;
    }

    async fn send(&self, msg: &RelayMessage) -> Result<(), ChannelError> {
        let bytes = msg.encode()?;
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(ChannelError::Closed)?;
        link.outgoing
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Send a request and wait for its acknowledgement.
    async fn request(
        &self,
        build: impl FnOnce(RequestId) -> RelayMessage,
    ) -> Result<(), ChannelError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send(&build(request_id)).await {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(e);
        }
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request_id);
                log::warn!("Relay request {request_id} timed out");
                Err(ChannelError::Timeout)
            }
        }
    }
}

async fn route(shared: &Shared, msg: RelayMessage) {
    match msg {
        RelayMessage::Snapshot { namespace, records } => {
            let records = Arc::new(parse_records(records));
            log::debug!("Snapshot of {namespace}: {} records", records.len());
            let mut namespaces = shared.namespaces.lock().await;
            namespaces
                .entry(namespace)
                .or_insert_with(|| watch::channel(Arc::new(Records::new())).0)
                .send_replace(records);
        }
        RelayMessage::Ack { request_id } | RelayMessage::Pong { request_id } => {
            if let Some(reply) = shared.pending.lock().await.remove(&request_id) {
                let _ = reply.send(Ok(()));
            }
        }
        RelayMessage::Nack { request_id, reason } => {
            if let Some(reply) = shared.pending.lock().await.remove(&request_id) {
                let _ = reply.send(Err(ChannelError::Rejected(reason)));
            }
        }
        other => log::debug!("Ignoring relay message {other:?}"),
    }
}

impl RealtimeChannel for RelayClient {
    async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ChannelError> {
        self.request(|request_id| RelayMessage::put(request_id, namespace, key, &value))
            .await
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), ChannelError> {
        self.request(|request_id| RelayMessage::Remove {
            request_id,
            namespace,
            key: key.to_string(),
        })
        .await
    }

    async fn subscribe(
        &self,
        namespace: Namespace,
    ) -> Result<Subscription<Arc<Records>>, ChannelError> {
        let rx = self
            .shared
            .namespaces
            .lock()
            .await
            .entry(namespace)
            .or_insert_with(|| watch::channel(Arc::new(Records::new())).0)
            .subscribe();
        // The snapshot frame precedes the Ack, so the watch is current here.
        self.request(|request_id| RelayMessage::Subscribe { request_id, namespace })
            .await?;
        Ok(Subscription::new(rx))
    }

    async fn arm_on_disconnect(&self, namespace: Namespace, key: &str) -> Result<(), ChannelError> {
        self.request(|request_id| RelayMessage::ArmOnDisconnect {
            request_id,
            namespace,
            key: key.to_string(),
        })
        .await
    }

    async fn cancel_on_disconnect(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<(), ChannelError> {
        self.request(|request_id| RelayMessage::CancelOnDisconnect {
            request_id,
            namespace,
            key: key.to_string(),
        })
        .await
    }

    async fn heartbeat(&self) -> Result<(), ChannelError> {
        self.request(|request_id| RelayMessage::Ping { request_id }).await
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = RelayClient::connect(ClientConfig::new(format!("ws://127.0.0.1:{port}"), "a")).await;
        assert!(matches!(result, Err(ChannelError::Closed)));
    }
}
