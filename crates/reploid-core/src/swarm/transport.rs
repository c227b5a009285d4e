//! Transport trait for swarm sync, grounded on `channels/traits.rs`'s
//! `Channel` trait: `send`/`broadcast` mirror `Channel::send`, and
//! `on_peer` replaces `Channel::listen`'s mpsc hand-off with a direct
//! callback registration, matching the event bus's `Fn`-handler style used
//! elsewhere in this crate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SwarmError;

/// Invoked with `(sender_peer_id, raw_bytes)` whenever a message arrives.
pub type PeerHandler = Box<dyn Fn(String, Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait SwarmTransport: Send + Sync {
    fn peer_id(&self) -> &str;

    async fn broadcast(&self, bytes: Vec<u8>) -> Result<(), SwarmError>;

    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), SwarmError>;

    /// Register a callback invoked on every inbound message. Returns a
    /// handle identifying the registration (unused for deregistration in
    /// the current transports; reserved for future `off`-style teardown).
    fn on_peer(&self, handler: PeerHandler) -> u64;
}

/// Shared registry that in-process [`LoopbackTransport`]s deliver messages
/// through. Stands in for a real network in tests and single-process
/// swarm simulations.
pub struct LoopbackHub {
    peers: parking_lot::Mutex<Vec<(String, PeerHandler)>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

pub struct LoopbackTransport {
    peer_id: String,
    hub: Arc<LoopbackHub>,
    max_payload_bytes: usize,
    rejected: std::sync::atomic::AtomicU64,
}

impl LoopbackTransport {
    pub fn new(peer_id: impl Into<String>, hub: Arc<LoopbackHub>, max_payload_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.into(),
            hub,
            max_payload_bytes,
            rejected: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn check_size(&self, bytes: &[u8]) -> Result<(), SwarmError> {
        if bytes.len() > self.max_payload_bytes {
            self.rejected.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            return Err(SwarmError::Protocol(format!(
                "payload of {} bytes exceeds ceiling of {} bytes",
                bytes.len(),
                self.max_payload_bytes
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SwarmTransport for LoopbackTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn broadcast(&self, bytes: Vec<u8>) -> Result<(), SwarmError> {
        self.check_size(&bytes)?;
        let peers = self.hub.peers.lock();
        for (peer, handler) in peers.iter() {
            if peer != &self.peer_id {
                handler(self.peer_id.clone(), bytes.clone());
            }
        }
        Ok(())
    }

    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), SwarmError> {
        self.check_size(&bytes)?;
        let peers = self.hub.peers.lock();
        match peers.iter().find(|(p, _)| p == peer_id) {
            Some((_, handler)) => {
                handler(self.peer_id.clone(), bytes);
                Ok(())
            }
            None => Err(SwarmError::Transport(format!("unknown peer: {peer_id}"))),
        }
    }

    fn on_peer(&self, handler: PeerHandler) -> u64 {
        let mut peers = self.hub.peers.lock();
        peers.push((self.peer_id.clone(), handler));
        peers.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn broadcast_reaches_other_peers_not_self() {
        let hub = LoopbackHub::new();
        let a = LoopbackTransport::new("a", Arc::clone(&hub), 1024);
        let b = LoopbackTransport::new("b", Arc::clone(&hub), 1024);
        let received_by_b = Arc::new(AtomicUsize::new(0));
        let received_by_a = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&received_by_b);
            b.on_peer(Box::new(move |_from, _bytes| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        {
            let counter = Arc::clone(&received_by_a);
            a.on_peer(Box::new(move |_from, _bytes| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        a.broadcast(b"hello".to_vec()).await.unwrap();
        assert_eq!(received_by_b.load(Ordering::SeqCst), 1);
        assert_eq!(received_by_a.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_and_counted() {
        let hub = LoopbackHub::new();
        let a = LoopbackTransport::new("a", Arc::clone(&hub), 4);
        let result = a.broadcast(b"too big".to_vec()).await;
        assert!(result.is_err());
        assert_eq!(a.rejected_count(), 1);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let hub = LoopbackHub::new();
        let a = LoopbackTransport::new("a", hub, 1024);
        let result = a.send("ghost", b"hi".to_vec()).await;
        assert!(result.is_err());
    }
}
