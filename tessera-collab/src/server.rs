//! WebSocket relay serving the realtime namespaces across processes.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── shapes   ─┐
//!             ├── connection task ──► │   presence  ├── changes (broadcast)
//! Client B ──┘      │                 └── cursors  ─┘        │
//!                   │                                        ▼
//!                   └─ armed: {(ns, key)}            every connection forwards
//!                      removed on close              snapshots of the namespaces
//!                                                    it subscribed to
//! ```
//!
//! Each change publishes the namespace's whole record set, so a connection
//! that lags behind the broadcast buffer recovers by resending the current
//! set of every namespace it follows.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::channel::{Namespace, Records};
use crate::config::RelayConfig;
use crate::protocol::{RelayMessage, RequestId};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
}

struct RelayState {
    namespaces: RwLock<HashMap<Namespace, Arc<Records>>>,
    changes: broadcast::Sender<(Namespace, Arc<Records>)>,
    stats: RwLock<RelayStats>,
}

impl RelayState {
    async fn current(&self, namespace: Namespace) -> Arc<Records> {
        self.namespaces
            .read()
            .await
            .get(&namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Apply `edit` to a namespace and publish the result if it changed.
    async fn modify(&self, namespace: Namespace, edit: impl FnOnce(&mut Records) -> bool) {
        let mut namespaces = self.namespaces.write().await;
        let records = namespaces.entry(namespace).or_default();
        if edit(Arc::make_mut(records)) {
            // No receivers is fine.
            let _ = self.changes.send((namespace, records.clone()));
        }
    }
}

/// Per-connection bookkeeping.
#[derive(Default)]
struct Peer {
    name: Option<String>,
    subscribed: HashSet<Namespace>,
    armed: HashSet<(Namespace, String)>,
}

impl Peer {
    fn label(&self, addr: SocketAddr) -> String {
        match &self.name {
            Some(name) => format!("{name}@{addr}"),
            None => addr.to_string(),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let (changes, _) = broadcast::channel(config.channel_capacity);
        Self {
            config,
            state: Arc::new(RelayState {
                namespaces: RwLock::new(HashMap::new()),
                changes,
                stats: RwLock::new(RelayStats::default()),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Accept WebSocket connections forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let state = self.state.clone();
            let max_connections = self.config.max_connections;
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, state, max_connections).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        state: Arc<RelayState>,
        max_connections: usize,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        {
            let mut s = state.stats.write().await;
            if s.active_connections as usize >= max_connections {
                s.rejected_connections += 1;
                drop(s);
                log::warn!("Rejecting {addr}: connection limit {max_connections} reached");
                ws_sender.send(Message::Close(None)).await?;
                return Ok(());
            }
            s.total_connections += 1;
            s.active_connections += 1;
        }
        log::info!("WebSocket connection established from {addr}");

        let mut peer = Peer::default();
        let mut changes = state.changes.subscribe();
        let result = Self::serve(
            &state,
            &mut peer,
            addr,
            &mut ws_sender,
            &mut ws_receiver,
            &mut changes,
        )
        .await;

        // Disconnect hooks run however the connection ended.
        for (namespace, key) in peer.armed.drain() {
            state
                .modify(namespace, |records| records.remove(&key).is_some())
                .await;
        }
        state.stats.write().await.active_connections -= 1;
        log::info!("Connection {} closed", peer.label(addr));
        result
    }

    async fn serve(
        state: &RelayState,
        peer: &mut Peer,
        addr: SocketAddr,
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsStream,
        changes: &mut broadcast::Receiver<(Namespace, Arc<Records>)>,
    ) -> Result<(), BoxError> {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = state.stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            match RelayMessage::decode(&data) {
                                Ok(relay_msg) => {
                                    Self::handle_message(state, peer, addr, ws_sender, relay_msg).await?;
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => break,

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                change = changes.recv() => {
                    match change {
                        Ok((namespace, records)) => {
                            if peer.subscribed.contains(&namespace) {
                                send(ws_sender, &RelayMessage::snapshot(namespace, &records)).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("{} lagged by {n} changes, resending snapshots", peer.label(addr));
                            for namespace in peer.subscribed.clone() {
                                let records = state.current(namespace).await;
                                send(ws_sender, &RelayMessage::snapshot(namespace, &records)).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_message(
        state: &RelayState,
        peer: &mut Peer,
        addr: SocketAddr,
        ws_sender: &mut WsSink,
        msg: RelayMessage,
    ) -> Result<(), BoxError> {
        match msg {
            RelayMessage::Hello { client_id, name } => {
                log::info!("Client {name} ({client_id}) connected from {addr}");
                peer.name = Some(name);
            }

            RelayMessage::Put { request_id, namespace, key, json } => {
                let value = match serde_json::from_str::<serde_json::Value>(&json) {
                    Ok(value) => value,
                    Err(e) => return nack(ws_sender, request_id, format!("invalid JSON: {e}")).await,
                };
                if namespace == Namespace::Cursors {
                    log::trace!("Cursor {key} from {}", peer.label(addr));
                }
                state
                    .modify(namespace, |records| {
                        records.insert(key, value);
                        true
                    })
                    .await;
                ack(ws_sender, request_id).await?;
            }

            RelayMessage::Remove { request_id, namespace, key } => {
                state
                    .modify(namespace, |records| records.remove(&key).is_some())
                    .await;
                ack(ws_sender, request_id).await?;
            }

            RelayMessage::ArmOnDisconnect { request_id, namespace, key } => {
                log::debug!("{} armed {namespace}/{key}", peer.label(addr));
                peer.armed.insert((namespace, key));
                ack(ws_sender, request_id).await?;
            }

            RelayMessage::CancelOnDisconnect { request_id, namespace, key } => {
                peer.armed.remove(&(namespace, key));
                ack(ws_sender, request_id).await?;
            }

            RelayMessage::Subscribe { request_id, namespace } => {
                peer.subscribed.insert(namespace);
                let records = state.current(namespace).await;
                send(ws_sender, &RelayMessage::snapshot(namespace, &records)).await?;
                ack(ws_sender, request_id).await?;
            }

            RelayMessage::Ping { request_id } => {
                send(ws_sender, &RelayMessage::Pong { request_id }).await?;
            }

            other => {
                log::debug!("Unexpected message from {}: {other:?}", peer.label(addr));
            }
        }
        Ok(())
    }

    /// Current records of a namespace.
    pub async fn records(&self, namespace: Namespace) -> Arc<Records> {
        self.state.current(namespace).await
    }

    pub async fn stats(&self) -> RelayStats {
        self.state.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

async fn send(ws_sender: &mut WsSink, msg: &RelayMessage) -> Result<(), BoxError> {
    ws_sender.send(Message::Binary(msg.encode()?.into())).await?;
    Ok(())
}

async fn ack(ws_sender: &mut WsSink, request_id: RequestId) -> Result<(), BoxError> {
    send(ws_sender, &RelayMessage::Ack { request_id }).await
}

async fn nack(ws_sender: &mut WsSink, request_id: RequestId, reason: String) -> Result<(), BoxError> {
    log::debug!("Rejecting request {request_id}: {reason}");
    send(ws_sender, &RelayMessage::Nack { request_id, reason }).await
}
