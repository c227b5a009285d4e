use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::record::{MemoryKind, MemoryRecord};

/// A record plus the bookkeeping needed to score and re-embed it; never
/// leaves the tier that owns it (`retrieve` returns plain `MemoryRecord`s).
pub(super) struct Stored {
    pub record: MemoryRecord,
    pub embedding: Vec<f32>,
    pub access_count: u32,
}

impl Stored {
    pub fn new(id: String, kind: MemoryKind, content: String, embedding: Vec<f32>, now: u64) -> Self {
        Self {
            record: MemoryRecord {
                id,
                kind,
                content,
                last_access: now,
                created_at: now,
                retention_score: 0.0,
            },
            embedding,
            access_count: 0,
        }
    }
}

/// Stable content hash used for episodic/semantic deterministic ids.
/// `DefaultHasher::new()` uses fixed keys (no per-process randomization),
/// so the same content always yields the same id.
pub(super) fn deterministic_id(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_id_is_stable_across_calls() {
        assert_eq!(deterministic_id("same content"), deterministic_id("same content"));
    }

    #[test]
    fn deterministic_id_differs_for_different_content() {
        assert_ne!(deterministic_id("a"), deterministic_id("b"));
    }
}
