use async_trait::async_trait;

use super::record::MemoryRecord;
use crate::error::MemoryError;

/// Common retrieval surface shared by the working, episodic, and semantic
/// tiers. Each tier keeps its own write-side lifecycle rules
/// as inherent methods; only retrieval is uniform across all three.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Rank stored records against `query`, returning at most `k`. `filter`,
    /// when present, is matched as a case-insensitive substring of a
    /// record's content before scoring.
    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;
}

pub(super) fn query_words(query: &str) -> Vec<String> {
    query.split_whitespace().map(|w| w.to_lowercase()).collect()
}

pub(super) fn passes_filter(content: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(needle) => content.to_lowercase().contains(&needle.to_lowercase()),
        None => true,
    }
}
