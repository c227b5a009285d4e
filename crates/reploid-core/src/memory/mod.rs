//! Memory Tiers: three independent stores behind one
//! retrieval trait, grounded on `memory/traits.rs`'s `Memory` trait and
//! `memory/store.rs`'s hybrid similarity/keyword scoring, which keys
//! everything by a single `MemoryCategory` enum on one store. Here each
//! tier has distinct lifecycle rules (bounded working, append-only
//! episodic, upsert-by-hash semantic) that don't fit one enum cleanly, so
//! each is its own `MemoryStore` implementation instead.

mod embeddings;
mod episodic;
mod internal;
mod record;
mod scoring;
mod semantic;
mod tier;
mod working;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MemoryError;

pub use embeddings::{cosine_similarity, EmbeddingProvider, MockEmbeddingProvider, EMBEDDING_DIM};
pub use episodic::{EpisodicMemory, EPISODES_PREFIX};
pub use record::{MemoryKind, MemoryRecord};
pub use semantic::{SemanticMemory, KNOWLEDGE_PREFIX};
pub use tier::MemoryStore;
pub use working::WorkingMemory;

/// Fans one retrieval out across all three tiers and merges the results,
/// so the Context Manager has a single `MemoryStore` to call rather than
/// querying Working, Episodic, and Semantic memory separately.
pub struct MemoryTiers {
    pub working: Arc<WorkingMemory>,
    pub episodic: Arc<EpisodicMemory>,
    pub semantic: Arc<SemanticMemory>,
}

impl MemoryTiers {
    pub fn new(working: Arc<WorkingMemory>, episodic: Arc<EpisodicMemory>, semantic: Arc<SemanticMemory>) -> Self {
        Self { working, episodic, semantic }
    }
}

#[async_trait]
impl MemoryStore for MemoryTiers {
    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut merged = Vec::new();
        merged.extend(self.working.retrieve(query, k, filter).await?);
        merged.extend(self.episodic.retrieve(query, k, filter).await?);
        merged.extend(self.semantic.retrieve(query, k, filter).await?);
        merged.sort_by(|a, b| b.retention_score.partial_cmp(&a.retention_score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(k);
        Ok(merged)
    }
}

#[cfg(test)]
mod tiers_tests {
    use super::*;
    use crate::memory::embeddings::MockEmbeddingProvider;
    use crate::vfs::InMemoryVfs;

    fn make() -> MemoryTiers {
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
        let vfs: Arc<dyn crate::vfs::Vfs> = Arc::new(InMemoryVfs::new("peer-1".to_string()));
        MemoryTiers::new(
            Arc::new(WorkingMemory::new(10, Arc::clone(&embeddings))),
            Arc::new(EpisodicMemory::new(Arc::clone(&vfs), Arc::clone(&embeddings))),
            Arc::new(SemanticMemory::new(vfs, embeddings)),
        )
    }

    #[tokio::test]
    async fn retrieve_merges_records_from_all_three_tiers() {
        let tiers = make();
        tiers.working.remember("working note about rockets").await.unwrap();
        tiers.episodic.append("rocket launch event occurred").await.unwrap();
        tiers.semantic.upsert("rockets use liquid fuel").await.unwrap();

        let results = tiers.retrieve("rocket", 10, None).await.unwrap();
        assert!(results.iter().any(|r| r.kind == MemoryKind::Working));
        assert!(results.iter().any(|r| r.kind == MemoryKind::Episodic));
        assert!(results.iter().any(|r| r.kind == MemoryKind::Semantic));
    }

    #[tokio::test]
    async fn retrieve_respects_k_across_merged_tiers() {
        let tiers = make();
        tiers.working.remember("alpha topic one").await.unwrap();
        tiers.episodic.append("alpha topic two").await.unwrap();
        tiers.semantic.upsert("alpha topic three").await.unwrap();

        let results = tiers.retrieve("alpha", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
