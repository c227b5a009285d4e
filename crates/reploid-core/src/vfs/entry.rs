//! The `FileEntry` record and the snapshot/export bundle shapes.

use serde::{Deserialize, Serialize};

/// A single stored file: bytes plus the metadata needed for LWW swarm
/// merges and stat queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub content: Vec<u8>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Lamport timestamp, bumped on every local write to this path.
    pub logical_clock: u64,
    /// Id of the peer that last wrote this entry.
    pub origin_peer: String,
}

impl FileEntry {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Metadata-only view of a [`FileEntry`], returned by `stat`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub logical_clock: u64,
}

impl From<&FileEntry> for Stat {
    fn from(entry: &FileEntry) -> Self {
        Self {
            size: entry.size(),
            updated_at: entry.updated_at,
            logical_clock: entry.logical_clock,
        }
    }
}

/// A full or partial export of the VFS, used by `export_all`/`import_all`
/// and by the audit/replay bundle format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExportBundle {
    pub files: Vec<FileEntry>,
}
