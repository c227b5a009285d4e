//! Wire format for swarm sync messages.

use serde::{Deserialize, Serialize};

/// Current protocol version. Envelopes from a different version are
/// rejected rather than interpreted.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    SyncRequest,
    SyncResponse,
    /// `artifact_*` messages: `sub_kind` distinguishes announce/request/data.
    Artifact { sub_kind: String },
    Ping,
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol_version: u32,
    pub kind: EnvelopeKind,
    pub peer_id: String,
    pub lamport: u64,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, peer_id: impl Into<String>, lamport: u64, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            kind,
            peer_id: peer_id.into(),
            lamport,
            payload,
        }
    }
}
