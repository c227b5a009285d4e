//! The `ToolDefinition` record: id, schema, capabilities, and a body reference.

use serde_json::Value;

use super::capability::Capability;

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub id: String,
    pub description: String,
    pub input_schema: Value,
    pub capabilities: Vec<Capability>,
    /// VFS path to the tool's executable body.
    pub body_ref: String,
}
