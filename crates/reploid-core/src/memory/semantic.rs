//! Semantic memory: upsert-by-content-hash extracted facts, persisted under
//! the VFS's reserved `/memory/knowledge/` prefix.

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

pub const KNOWLEDGE_PREFIX: &str = "/memory/knowledge";

pub struct SemanticMemory {
    vfs: Arc<dyn Vfs>,
    embeddings: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Stored>>,
    clock: AtomicU64,
}

impl SemanticMemory {
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

    /// Upsert a fact keyed by its content hash: writing the same content
    /// twice updates `last_access` in place rather than duplicating the
    /// record; writing different content under the same key is impossible
    /// by construction since the key *is* the hash of the content.
    pub async fn upsert(&self, content: impl Into<String>) -> Result<String, MemoryError> {
        let content = content.into();
        let id = deterministic_id(&content);
        let embedding = self.embeddings.embed(&content).await?;
        let now = self.tick();

        self.vfs
            .write(&format!("{KNOWLEDGE_PREFIX}/{id}"), content.clone().into_bytes())
            .await?;

        let mut cache = self.cache.write();
        cache
            .entry(id.clone())
            .and_modify(|stored| stored.record.last_access = now)
            .or_insert_with(|| Stored::new(id.clone(), MemoryKind::Semantic, content, embedding, now));
        Ok(id)
    }

    pub async fn forget(&self, id: &str) -> Result<bool, MemoryError> {
        let removed = self.cache.write().remove(id).is_some();
        if removed {
            self.vfs.delete(&format!("{KNOWLEDGE_PREFIX}/{id}")).await?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }
}

#[async_trait]
impl MemoryStore for SemanticMemory {
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

    fn make() -> SemanticMemory {
        let vfs = Arc::new(InMemoryVfs::new("peer-1".to_string()));
        SemanticMemory::new(vfs, Arc::new(MockEmbeddingProvider::new()))
    }

    #[tokio::test]
    async fn upsert_then_retrieve_round_trips() {
        let store = make();
        store.upsert("water boils at 100 degrees celsius").await.unwrap();
        let results = store.retrieve("boiling point water", 5, None).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn upsert_same_content_does_not_duplicate() {
        let store = make();
        store.upsert("the sun is a star").await.unwrap();
        store.upsert("the sun is a star").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn forget_removes_entry_and_returns_true() {
        let store = make();
        let id = store.upsert("transient fact").await.unwrap();
        assert!(store.forget(&id).await.unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn forget_unknown_id_returns_false() {
        let store = make();
        assert!(!store.forget("does-not-exist").await.unwrap());
    }
}
