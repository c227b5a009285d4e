//! Working memory: bounded by count, in-RAM only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::embeddings::{cosine_similarity, EmbeddingProvider};
use super::internal::Stored;
use super::record::{MemoryKind, MemoryRecord};
use super::scoring::{combined_score, keyword_score, retention_component, similarity_component};
use super::tier::{passes_filter, query_words, MemoryStore};
use crate::error::MemoryError;

pub struct WorkingMemory {
    entries: RwLock<VecDeque<Stored>>,
    capacity: usize,
    embeddings: Arc<dyn EmbeddingProvider>,
    clock: AtomicU64,
}

impl WorkingMemory {
    pub fn new(capacity: usize, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            embeddings,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    /// Remember `content`, evicting the oldest entry once `capacity` is
    /// exceeded. Returns the new record's id.
    pub async fn remember(&self, content: impl Into<String>) -> Result<String, MemoryError> {
        let content = content.into();
        let embedding = self.embeddings.embed(&content).await?;
        let now = self.tick();
        let id = Uuid::new_v4().to_string();

        let mut entries = self.entries.write();
        entries.push_back(Stored::new(id.clone(), MemoryKind::Working, content, embedding, now));
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MemoryStore for WorkingMemory {
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

        let mut entries = self.entries.write();
        let mut scored: Vec<MemoryRecord> = entries
            .iter_mut()
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

    fn make(capacity: usize) -> WorkingMemory {
        WorkingMemory::new(capacity, Arc::new(MockEmbeddingProvider::new()))
    }

    #[tokio::test]
    async fn remember_then_retrieve_round_trips() {
        let store = make(10);
        store.remember("the sky is blue today").await.unwrap();
        let results = store.retrieve("sky blue", 5, None).await.unwrap();
        assert!(!results.is_empty());
        assert!(results[0].content.contains("sky"));
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = make(2);
        store.remember("first").await.unwrap();
        store.remember("second").await.unwrap();
        store.remember("third").await.unwrap();
        assert_eq!(store.len(), 2);
        let results = store.retrieve("first", 10, None).await.unwrap();
        assert!(results.iter().all(|r| r.content != "first"));
    }

    #[tokio::test]
    async fn retrieve_respects_filter() {
        let store = make(10);
        store.remember("apples are red").await.unwrap();
        store.remember("bananas are yellow").await.unwrap();
        let results = store.retrieve("fruit color", 10, Some("banana")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("banana"));
    }

    #[tokio::test]
    async fn retrieve_limit_zero_returns_empty() {
        let store = make(10);
        store.remember("content").await.unwrap();
        let results = store.retrieve("content", 0, None).await.unwrap();
        assert!(results.is_empty());
    }
}
