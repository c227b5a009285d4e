//! Swarm Sync: peers exchange VFS writes as envelopes
//! carrying Lamport timestamps, merged into the local VFS with a
//! last-writer-wins rule. The transport trait is grounded on
//! `channels/traits.rs`'s `Channel` trait; the websocket implementation's
//! read/write loop is grounded on `gateway/ws.rs`'s `handle_socket`.

mod envelope;
mod transport;

#[cfg(feature = "swarm-ws")]
mod ws;

pub use envelope::{Envelope, EnvelopeKind, PROTOCOL_VERSION};
pub use transport::{LoopbackHub, LoopbackTransport, PeerHandler, SwarmTransport};

#[cfg(feature = "swarm-ws")]
pub use ws::WebSocketTransport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::SwarmError;
use crate::vfs::{FileEntry, InMemoryVfs};

/// Binds a [`SwarmTransport`] to a local [`InMemoryVfs`], applying inbound
/// artifact envelopes through the VFS's own Lamport-clock merge and
/// broadcasting local writes outward. Tied to `InMemoryVfs` specifically
/// rather than the `Vfs` trait object: the last-writer-wins merge needs the
/// logical clock bookkeeping only the in-memory backend exposes.
pub struct SwarmSync {
    vfs: Arc<InMemoryVfs>,
    transport: Arc<dyn SwarmTransport>,
    rejected: AtomicU64,
}

impl SwarmSync {
    pub fn new(vfs: Arc<InMemoryVfs>, transport: Arc<dyn SwarmTransport>) -> Arc<Self> {
        Arc::new(Self {
            vfs,
            transport,
            rejected: AtomicU64::new(0),
        })
    }

    /// Register this instance's inbound handler with its transport. Split
    /// from `new` because the handler closure needs an `Arc` to the
    /// already-constructed coordinator.
    pub fn install(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.transport.on_peer(Box::new(move |_from, bytes| {
            this.handle_inbound(&bytes);
        }));
    }

    fn handle_inbound(&self, bytes: &[u8]) {
        let envelope: Envelope = match serde_json::from_slice(bytes) {
            Ok(e) => e,
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };
        if envelope.protocol_version != PROTOCOL_VERSION {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.vfs.observe_clock(envelope.lamport);

        if let EnvelopeKind::Artifact { .. } = &envelope.kind {
            match serde_json::from_value::<FileEntry>(envelope.payload) {
                Ok(entry) => {
                    self.vfs.merge_entry(entry);
                }
                Err(_) => {
                    self.rejected.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// Broadcast a local write to every peer as an `artifact_data` envelope.
    pub async fn broadcast_entry(&self, entry: FileEntry) -> Result<(), SwarmError> {
        let envelope = Envelope::new(
            EnvelopeKind::Artifact { sub_kind: "data".to_string() },
            self.vfs.peer_id(),
            self.vfs.current_clock(),
            serde_json::to_value(&entry).map_err(|e| SwarmError::Protocol(e.to_string()))?,
        );
        let bytes = serde_json::to_vec(&envelope).map_err(|e| SwarmError::Protocol(e.to_string()))?;
        self.transport.broadcast(bytes).await
    }

    pub async fn ping(&self) -> Result<(), SwarmError> {
        let envelope = Envelope::new(
            EnvelopeKind::Ping,
            self.vfs.peer_id(),
            self.vfs.current_clock(),
            serde_json::json!({}),
        );
        let bytes = serde_json::to_vec(&envelope).map_err(|e| SwarmError::Protocol(e.to_string()))?;
        self.transport.broadcast(bytes).await
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}
