//! The executable side of a tool: `ToolBody` plus the capability-scoped
//! handle its implementation runs with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::capability::{satisfies, Capability};
use super::runner::ToolRunner;
use crate::error::ToolError;
use crate::vfs::Vfs;

/// Capability-scoped execution context a [`ToolBody`] receives for the
/// duration of one invocation. It cannot outlive that invocation.
pub struct ToolContext {
    pub vfs: Arc<dyn Vfs>,
    pub capabilities: Vec<Capability>,
    pub remaining_budget: Duration,
    pub(super) runner: Arc<ToolRunner>,
}

impl ToolContext {
    /// Invoke another registered tool, propagating a shortened deadline
    /// equal to whatever budget remains on this invocation.
    pub async fn invoke_nested(&self, tool_id: &str, input: Value) -> Result<Value, ToolError> {
        if !satisfies(&self.capabilities, &Capability::InvokeTool) {
            return Err(ToolError::CapabilityDenied(Capability::InvokeTool.to_string()));
        }
        self.runner
            .invoke(tool_id, input, self.capabilities.clone(), self.remaining_budget)
            .await
    }
}

#[async_trait]
pub trait ToolBody: Send + Sync {
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}
