//! The LLM adapter boundary: wire types, the `LlmClient` trait, and a
//! recorded-response client used during replay.

mod client;
mod http;
mod recorded;
mod types;

pub use client::{DeltaStream, LlmClient, StreamAssembler};
pub use http::{HttpLlmClient, HttpLlmClientConfig};
pub use recorded::RecordedLlmClient;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StreamDelta, ToolCallRequest};
