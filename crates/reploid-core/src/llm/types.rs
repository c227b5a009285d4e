//! Wire shapes for the LLM adapter boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    /// Tool catalog text rendered by `tools::render_tool_catalog`, appended
    /// to the system context so the model knows what it may call.
    pub tool_catalog: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompletionResponse {
    Text(String),
    ToolCall(ToolCallRequest),
}

/// One chunk of a streamed completion. `text` may split a multi-byte UTF-8
/// sequence; callers must buffer until `StreamAssembler` yields a complete
/// one.
#[derive(Debug, Clone)]
pub struct StreamDelta {
    pub bytes: Vec<u8>,
    pub is_final: bool,
}
