//! WebSocket swarm transport, grounded on `gateway/ws.rs`'s `handle_socket`
//! select loop: one task reads a shared outbound queue and writes frames
//! out, a second task reads inbound frames and dispatches them to
//! registered peer handlers, adapted from a chat-message/event relay to
//! the envelope protocol of this module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::transport::{PeerHandler, SwarmTransport};
use crate::error::SwarmError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A single peer-to-peer websocket connection used as a swarm transport.
/// Unlike [`LoopbackTransport`](super::LoopbackTransport), this speaks to
/// exactly one remote peer; `broadcast` and `send` are equivalent here.
pub struct WebSocketTransport {
    peer_id: String,
    remote_peer_id: Mutex<Option<String>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    handlers: Mutex<Vec<PeerHandler>>,
    max_payload_bytes: usize,
    rejected: AtomicU64,
}

impl WebSocketTransport {
    /// Spawn the read/write loop over an already-established connection and
    /// return the transport handle. The caller is responsible for opening
    /// the connection (`tokio_tungstenite::connect_async` or an accepted
    /// server-side upgrade) and handing over the resulting stream.
    pub fn spawn(peer_id: impl Into<String>, stream: WsStream, max_payload_bytes: usize) -> Arc<Self> {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let transport = Arc::new(Self {
            peer_id: peer_id.into(),
            remote_peer_id: Mutex::new(None),
            outbound: outbound_tx,
            handlers: Mutex::new(Vec::new()),
            max_payload_bytes,
            rejected: AtomicU64::new(0),
        });

        let (mut write, mut read) = stream.split();
        let loop_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        match outgoing {
                            Some(bytes) => {
                                if write.send(Message::Binary(bytes)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(Message::Binary(bytes))) => loop_transport.dispatch(bytes),
                            Some(Ok(Message::Text(text))) => loop_transport.dispatch(text.into_bytes()),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => break,
                        }
                    }
                }
            }
        });

        transport
    }

    fn dispatch(&self, bytes: Vec<u8>) {
        if bytes.len() > self.max_payload_bytes {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let from = self
            .remote_peer_id
            .lock()
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        for handler in self.handlers.lock().iter() {
            handler(from.clone(), bytes.clone());
        }
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwarmTransport for WebSocketTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn broadcast(&self, bytes: Vec<u8>) -> Result<(), SwarmError> {
        if bytes.len() > self.max_payload_bytes {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(SwarmError::Protocol("payload exceeds ceiling".to_string()));
        }
        self.outbound
            .send(bytes)
            .map_err(|e| SwarmError::Transport(e.to_string()))
    }

    async fn send(&self, _peer_id: &str, bytes: Vec<u8>) -> Result<(), SwarmError> {
        // A single connection has exactly one remote peer; routing by id is
        // the swarm coordinator's job when it holds more than one transport.
        self.broadcast(bytes).await
    }

    fn on_peer(&self, handler: PeerHandler) -> u64 {
        let mut handlers = self.handlers.lock();
        handlers.push(handler);
        handlers.len() as u64
    }
}
