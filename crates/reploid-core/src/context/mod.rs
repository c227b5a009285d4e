//! The Context Manager: the bounded, ordered message window a live cycle
//! assembles its next LLM call from.
//!
//! Grounded on `agent/loop_.rs`'s `AgentConfig::max_history` trimming, which
//! trims by a fixed message count; REPLOID generalizes that to a
//! token-budget count and additionally summarizes evicted content (rather
//! than dropping it outright) via an LLM call at temperature 0.

use std::sync::Arc;

use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, Message, Role};
use crate::memory::MemoryStore;

/// Estimates the token cost of a message. Production callers pass a real
/// tokenizer; tests use the word-count approximation below.
pub type TokenEstimator = Arc<dyn Fn(&Message) -> u64 + Send + Sync>;

pub fn approximate_token_estimator() -> TokenEstimator {
    Arc::new(|message: &Message| (message.content.split_whitespace().count() as u64).max(1))
}

pub struct ContextWindow {
    messages: Vec<Message>,
    token_estimates: Vec<u64>,
    budget: u64,
    estimator: TokenEstimator,
}

impl ContextWindow {
    pub fn new(budget: u64, estimator: TokenEstimator) -> Self {
        Self {
            messages: Vec::new(),
            token_estimates: Vec::new(),
            budget,
            estimator,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn total_tokens(&self) -> u64 {
        self.token_estimates.iter().sum()
    }

    /// Append `message`, running eviction first if it would blow the
    /// budget.
    pub async fn append(&mut self, message: Message, llm: &dyn LlmClient) {
        let estimate = (self.estimator)(&message);
        while self.total_tokens() + estimate > self.budget && self.has_evictable() {
            self.evict_one(llm).await;
        }
        self.token_estimates.push(estimate);
        self.messages.push(message);
    }

    /// Index of the most recent user message, never evicted.
    fn most_recent_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    fn has_evictable(&self) -> bool {
        let protected_user = self.most_recent_user_index();
        self.messages
            .iter()
            .enumerate()
            .any(|(i, m)| m.role != Role::System && Some(i) != protected_user)
    }

    /// Evict the oldest eligible message, replacing it with an LLM-produced
    /// summary at the same position.
    async fn evict_one(&mut self, llm: &dyn LlmClient) {
        let protected_user = self.most_recent_user_index();
        let Some(index) = self
            .messages
            .iter()
            .enumerate()
            .find(|(i, m)| m.role != Role::System && Some(*i) != protected_user)
            .map(|(i, _)| i)
        else {
            return;
        };

        let evicted = self.messages.remove(index);
        self.token_estimates.remove(index);

        let summary = summarize(llm, &evicted).await;
        let summary_message = Message::new(evicted.role, format!("[evicted summary] {summary}"));
        let estimate = (self.estimator)(&summary_message);
        self.messages.insert(index, summary_message);
        self.token_estimates.insert(index, estimate);
    }

    /// Build the message list for the next LLM call: the window's own
    /// messages, plus up to `memory_k` records retrieved from `memory`
    /// against `prompt_hints`, folded in as a trailing system message and
    /// trimmed to whatever budget the window has left. Does not mutate the
    /// window itself, so eviction decisions stay driven only by `append`.
    pub async fn assemble(&self, prompt_hints: &str, memory: &dyn MemoryStore, memory_k: usize) -> Vec<Message> {
        let mut assembled = self.messages.clone();

        let remaining = self.budget.saturating_sub(self.total_tokens());
        if remaining == 0 {
            return assembled;
        }

        let records = memory.retrieve(prompt_hints, memory_k, None).await.unwrap_or_default();
        if records.is_empty() {
            return assembled;
        }

        let mut recalled = Vec::new();
        let mut used = 0u64;
        for record in &records {
            let line = format!("- {}", record.content);
            let candidate = Message::new(Role::System, line.clone());
            let cost = (self.estimator)(&candidate);
            if used + cost > remaining {
                break;
            }
            used += cost;
            recalled.push(line);
        }

        if !recalled.is_empty() {
            assembled.push(Message::new(Role::System, format!("Relevant memories:\n{}", recalled.join("\n"))));
        }
        assembled
    }
}

async fn summarize(llm: &dyn LlmClient, message: &Message) -> String {
    let request = CompletionRequest {
        messages: vec![Message::new(
            Role::System,
            format!("Summarize the following message in one sentence:\n{}", message.content),
        )],
        temperature: 0.0,
        tool_catalog: None,
    };
    match llm.complete(request).await {
        Ok(CompletionResponse::Text(text)) => text,
        _ => message.content.chars().take(80).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RecordedLlmClient;
    use crate::memory::{EmbeddingProvider, MockEmbeddingProvider, WorkingMemory};

    fn evicting_llm() -> RecordedLlmClient {
        RecordedLlmClient::new(vec![CompletionResponse::Text("summary".into()); 64])
    }

    #[tokio::test]
    async fn appends_without_eviction_under_budget() {
        let llm = evicting_llm();
        let mut window = ContextWindow::new(1000, approximate_token_estimator());
        window.append(Message::new(Role::User, "hello there"), &llm).await;
        assert_eq!(window.messages().len(), 1);
    }

    #[tokio::test]
    async fn system_messages_are_never_evicted() {
        let llm = evicting_llm();
        let mut window = ContextWindow::new(3, approximate_token_estimator());
        window.append(Message::new(Role::System, "rules"), &llm).await;
        window.append(Message::new(Role::User, "do a thing please"), &llm).await;
        window.append(Message::new(Role::Assistant, "ok sure thing"), &llm).await;

        assert_eq!(window.messages()[0].role, Role::System);
        assert_eq!(window.messages()[0].content, "rules");
    }

    #[tokio::test]
    async fn most_recent_user_message_is_never_evicted() {
        let llm = evicting_llm();
        let mut window = ContextWindow::new(2, approximate_token_estimator());
        window.append(Message::new(Role::User, "first goal right here"), &llm).await;
        window.append(Message::new(Role::User, "second goal right here"), &llm).await;

        let last = window.messages().last().unwrap();
        assert_eq!(last.content, "second goal right here");
    }

    #[tokio::test]
    async fn eviction_replaces_oldest_message_with_summary() {
        let llm = evicting_llm();
        let mut window = ContextWindow::new(4, approximate_token_estimator());
        window.append(Message::new(Role::Assistant, "one two three four"), &llm).await;
        window.append(Message::new(Role::User, "goal right here now"), &llm).await;

        assert!(window.messages()[0].content.starts_with("[evicted summary]"));
    }

    #[tokio::test]
    async fn assemble_folds_in_relevant_memories_within_budget() {
        let llm = evicting_llm();
        let mut window = ContextWindow::new(1000, approximate_token_estimator());
        window.append(Message::new(Role::User, "what do we know about rockets"), &llm).await;

        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
        let memory = WorkingMemory::new(10, embeddings);
        memory.remember("rockets use liquid fuel").await.unwrap();

        let assembled = window.assemble("rockets", &memory, 5).await;
        assert!(assembled.len() > window.messages().len());
        assert!(assembled.last().unwrap().content.contains("liquid fuel"));
    }

    #[tokio::test]
    async fn assemble_skips_memories_once_the_budget_is_exhausted() {
        let llm = evicting_llm();
        let mut window = ContextWindow::new(2, approximate_token_estimator());
        window.append(Message::new(Role::User, "first goal right here"), &llm).await;

        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
        let memory = WorkingMemory::new(10, embeddings);
        memory.remember("some unrelated recollection").await.unwrap();

        let assembled = window.assemble("first goal", &memory, 5).await;
        assert_eq!(assembled.len(), window.messages().len());
    }

    #[tokio::test]
    async fn assemble_leaves_messages_untouched_when_memory_is_empty() {
        let llm = evicting_llm();
        let mut window = ContextWindow::new(1000, approximate_token_estimator());
        window.append(Message::new(Role::User, "hello"), &llm).await;

        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
        let memory = WorkingMemory::new(10, embeddings);

        let assembled = window.assemble("hello", &memory, 5).await;
        assert_eq!(assembled, window.messages());
    }
}
