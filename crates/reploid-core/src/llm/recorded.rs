//! A recorded-response client used during replay: LLM calls are satisfied
//! by completions recorded in a run bundle rather than re-invoked against
//! a live provider. Grounded on the same provider-trait boundary
//! `ai::provider::LLMProvider` uses to swap in mock providers for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;

use super::client::{DeltaStream, LlmClient};
use super::types::{CompletionRequest, CompletionResponse, StreamDelta};
use crate::error::LlmError;

pub struct RecordedLlmClient {
    responses: Vec<CompletionResponse>,
    cursor: AtomicUsize,
}

impl RecordedLlmClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for RecordedLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(index)
            .cloned()
            .ok_or_else(|| LlmError::Malformed("replay bundle exhausted its recorded completions".into()))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError> {
        let response = self.complete(request).await?;
        let text = match response {
            CompletionResponse::Text(t) => t,
            CompletionResponse::ToolCall(call) => serde_json::to_string(&call).unwrap_or_default(),
        };
        let delta = StreamDelta {
            bytes: text.into_bytes(),
            is_final: true,
        };
        Ok(Box::pin(stream::iter(vec![Ok(delta)])))
    }

    fn context_limit(&self) -> usize {
        usize::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_recorded_completions_in_order() {
        let client = RecordedLlmClient::new(vec![
            CompletionResponse::Text("first".into()),
            CompletionResponse::Text("second".into()),
        ]);
        let request = CompletionRequest {
            messages: vec![],
            temperature: 0.0,
            tool_catalog: None,
        };
        let first = client.complete(request.clone()).await.unwrap();
        let second = client.complete(request).await.unwrap();
        assert!(matches!(first, CompletionResponse::Text(t) if t == "first"));
        assert!(matches!(second, CompletionResponse::Text(t) if t == "second"));
    }

    #[tokio::test]
    async fn exhausted_bundle_errors() {
        let client = RecordedLlmClient::new(vec![]);
        let request = CompletionRequest {
            messages: vec![],
            temperature: 0.0,
            tool_catalog: None,
        };
        assert!(client.complete(request).await.is_err());
    }
}
