//! An OpenAI-compatible HTTP [`LlmClient`], grounded on
//! `ai/providers/openai_compatible.rs`'s `OpenAICompatibleConfig` and
//! chat-completions request/response shapes, adapted to this crate's
//! role/content wire types. Works against any OpenAI-compatible endpoint
//! (OpenAI, Ollama, OpenRouter, Vercel AI Gateway, ...).
//!
//! `stream()` is implemented by running `complete()` to completion and
//! replaying it as a single final delta: real SSE stream parsing pulls in
//! `eventsource_stream`, which this crate does not depend on since the
//! cycle engine only ever awaits `complete()`'s whole response.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::client::{DeltaStream, LlmClient};
use super::types::{CompletionRequest, CompletionResponse, Role, StreamDelta, ToolCallRequest};
use crate::error::LlmError;

#[derive(Debug, Clone)]
pub struct HttpLlmClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub context_limit: usize,
}

impl Default for HttpLlmClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
            context_limit: 128_000,
        }
    }
}

pub struct HttpLlmClient {
    config: HttpLlmClientConfig,
    http: Client,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmClientConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool | Role::ToolResult => "tool",
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Tool-call convention: a completion whose content parses as this shape
/// is a tool call rather than free text, since `CompletionRequest` carries
/// the tool catalog as a rendered string rather than a structured schema
/// array for the provider's native tool-calling feature.
#[derive(Deserialize)]
struct ToolCallEnvelope {
    tool_call: ToolCallPayload,
}

#[derive(Deserialize)]
struct ToolCallPayload {
    name: String,
    arguments: serde_json::Value,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut messages: Vec<ApiMessage> = request
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: role_str(m.role),
                content: m.content.clone(),
            })
            .collect();
        if let Some(catalog) = &request.tool_catalog {
            messages.insert(
                0,
                ApiMessage {
                    role: "system",
                    content: format!(
                        "Available tools:\n{catalog}\n\nTo call a tool, respond with exactly \
                         {{\"tool_call\": {{\"name\": \"...\", \"arguments\": {{...}}}}}}. \
                         Otherwise respond with plain text."
                    ),
                },
            );
        }

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: request.temperature,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!("http {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?
            .message
            .content;

        match serde_json::from_str::<ToolCallEnvelope>(&content) {
            Ok(envelope) => Ok(CompletionResponse::ToolCall(ToolCallRequest {
                name: envelope.tool_call.name,
                arguments: envelope.tool_call.arguments,
            })),
            Err(_) => Ok(CompletionResponse::Text(content)),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError> {
        let response = self.complete(request).await?;
        let text = match response {
            CompletionResponse::Text(text) => text,
            CompletionResponse::ToolCall(call) => serde_json::to_string(&call).unwrap_or_default(),
        };
        let delta = StreamDelta {
            bytes: text.into_bytes(),
            is_final: true,
        };
        let s = stream::once(async move { Ok(delta) });
        Ok(Box::pin(s) as Pin<Box<dyn futures::Stream<Item = Result<StreamDelta, LlmError>> + Send>>)
    }

    fn context_limit(&self) -> usize {
        self.config.context_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_str_maps_tool_and_tool_result_to_the_same_wire_role() {
        assert_eq!(role_str(Role::System), "system");
        assert_eq!(role_str(Role::User), "user");
        assert_eq!(role_str(Role::Assistant), "assistant");
        assert_eq!(role_str(Role::Tool), "tool");
        assert_eq!(role_str(Role::ToolResult), "tool");
    }

    #[test]
    fn tool_call_envelope_parses_from_the_documented_shape() {
        let content = r#"{"tool_call": {"name": "read_file", "arguments": {"path": "/a"}}}"#;
        let envelope: ToolCallEnvelope = serde_json::from_str(content).unwrap();
        assert_eq!(envelope.tool_call.name, "read_file");
    }

    #[test]
    fn plain_text_does_not_parse_as_a_tool_call_envelope() {
        let content = "the answer is 42";
        let parsed = serde_json::from_str::<ToolCallEnvelope>(content);
        assert!(parsed.is_err());
    }

    #[test]
    fn default_config_targets_the_openai_chat_completions_endpoint() {
        let config = HttpLlmClientConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert!(!config.model.is_empty());
    }

    #[test]
    fn new_builds_successfully_with_default_config() {
        assert!(HttpLlmClient::new(HttpLlmClientConfig::default()).is_ok());
    }
}
