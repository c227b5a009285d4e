//! The LLM adapter boundary.
//!
//! Grounded on the `ai::LLMProvider` trait in `ai/provider.rs`: the same
//! `complete`/`stream` split, generalized from provider-specific
//! `CompletionRequest`/`CompletionResponse` types to this crate's plain
//! role/content wire shapes. Keeping production and mock clients
//! interchangeable behind one trait is exactly what makes deterministic
//! replay possible here.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{CompletionRequest, CompletionResponse, StreamDelta};
use crate::error::LlmError;

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, LlmError>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError>;
    fn context_limit(&self) -> usize;
}

/// Buffers streamed bytes and yields text only once it forms complete
/// UTF-8, preserving any trailing partial byte sequence until a complete
/// one is available.
#[derive(Default)]
pub struct StreamAssembler {
    pending: Vec<u8>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of raw bytes. Returns the longest valid UTF-8
    /// prefix extractable so far; any trailing partial sequence stays
    /// buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) => {
                let valid_len = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid_len]).into_owned();
                self.pending.drain(..valid_len);
                text
            }
        }
    }

    /// Force-decode whatever bytes remain at stream end, replacing any
    /// truncated sequence with the Unicode replacement character.
    pub fn flush(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
