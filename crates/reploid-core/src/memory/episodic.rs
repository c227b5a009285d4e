//! Episodic memory: append-only, deterministic ids, persisted under the
//! VFS's reserved `/memory/episodes/` prefix so its size is bounded by VFS
//! quota rather than process RAM.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::embeddings::{cosine_similarity, EmbeddingProvider};
use super::internal::{deterministic_id, Stored};
use super::record::{MemoryKind, MemoryRecord};
use super::scoring::{combined_score, keyword_score, retention_component, similarity_component};
use super::tier::{passes_filter, query_words, MemoryStore};
use crate::error::MemoryError;
use crate::vfs::Vfs;

pub const EPISODES_PREFIX: &str = "/memory/episodes";

pub struct EpisodicMemory {
    vfs: Arc<dyn Vfs>,
    embeddings: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Stored>>,
    clock: AtomicU64,
}

impl EpisodicMemory {
    pub fn new(vfs: Arc<dyn Vfs>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            vfs,
            embeddings,
            cache: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    /// Append `content`. Appending the same content again is idempotent:
    /// the deterministic id collides and the existing record is refreshed
    /// in place rather than duplicated.
    pub async fn append(&self, content: impl Into<String>) -> Result<String, MemoryError> {
        let content = content.into();
        let id = deterministic_id(&content);
        let embedding = self.embeddings.embed(&content).await?;
        let now = self.tick();

        self.vfs
            .write(&format!("{EPISODES_PREFIX}/{id}"), content.clone().into_bytes())
            .await?;

        let mut cache = self.cache.write();
        cache
            .entry(id.clone())
            .and_modify(|stored| {
                stored.embedding = embedding.clone();
                stored.record.last_access = now;
            })
            .or_insert_with(|| Stored::new(id.clone(), MemoryKind::Episodic, content, embedding, now));
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }
}

#[async_trait]
impl MemoryStore for EpisodicMemory {
    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embeddings.embed(query).await?;
        let words = query_words(query);
        let now = self.tick();

        let mut cache = self.cache.write();
        let mut scored: Vec<MemoryRecord> = cache
            .values_mut()
            .filter(|stored| passes_filter(&stored.record.content, filter))
            .map(|stored| {
                let similarity = similarity_component(
                    cosine_similarity(&query_embedding, &stored.embedding),
                    keyword_score(&words, &stored.record.content),
                );
                let retention = retention_component(now, stored.record.last_access, stored.access_count);
                stored.record.retention_score = combined_score(similarity, retention);
                stored.record.last_access = now;
                stored.access_count += 1;
                stored.record.clone()
            })
            .collect();

        scored.sort_by(|a, b| b.retention_score.partial_cmp(&a.retention_score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embeddings::MockEmbeddingProvider;
    use crate::vfs::InMemoryVfs;

    fn make() -> EpisodicMemory {
        let vfs = Arc::new(InMemoryVfs::new("peer-1".to_string()));
        EpisodicMemory::new(vfs, Arc::new(MockEmbeddingProvider::new()))
    }

    #[tokio::test]
    async fn append_then_retrieve_round_trips() {
        let store = make();
        store.append("the launch sequence completed successfully").await.unwrap();
        let results = store.retrieve("launch sequence", 5, None).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn same_content_yields_same_id() {
        let store = make();
        let first = store.append("repeat me exactly").await.unwrap();
        let second = store.append("repeat me exactly").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn different_content_yields_different_ids() {
        let store = make();
        let a = store.append("event a").await.unwrap();
        let b = store.append("event b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn append_persists_to_vfs() {
        let vfs = Arc::new(InMemoryVfs::new("peer-1".to_string()));
        let store = EpisodicMemory::new(vfs.clone(), Arc::new(MockEmbeddingProvider::new()));
        let id = store.append("durable event").await.unwrap();
        let bytes = vfs.read(&format!("{EPISODES_PREFIX}/{id}")).await.unwrap();
        assert_eq!(bytes, b"durable event");
    }
}
