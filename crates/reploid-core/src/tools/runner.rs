//! The tool dispatcher: schema/capability checks, sandboxed execution with
//! a deadline, and the `tool:start`/`tool:success`/`tool:error` event
//! triple every invocation emits.
//!
//! Grounded on `agent/loop_.rs`'s tool dispatch loop and
//! `modules/container/sandbox.rs`'s per-call `Duration` budgets: here the
//! "sandbox" is the capability handle the [`ToolContext`] carries rather
//! than a container, but the cancellation-by-timeout shape is the same.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::body::ToolContext;
use super::capability::{satisfies, Capability};
use super::registry::ToolRegistry;
use super::schema;
use crate::error::ToolError;
use crate::event_bus::{Event, EventBus};
use crate::vfs::Vfs;

pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
    vfs: Arc<dyn Vfs>,
    default_timeout: Duration,
    output_ceiling_bytes: usize,
}

impl ToolRunner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        bus: Arc<EventBus>,
        vfs: Arc<dyn Vfs>,
        default_timeout: Duration,
        output_ceiling_bytes: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bus,
            vfs,
            default_timeout,
            output_ceiling_bytes,
        })
    }

    /// Dispatch `tool_id` with `input`, scoped to `granted` capabilities and
    /// a `budget` ceiling on top of this runner's configured default.
    pub async fn invoke(
        self: &Arc<Self>,
        tool_id: &str,
        input: Value,
        granted: Vec<Capability>,
        budget: Duration,
    ) -> Result<Value, ToolError> {
        self.bus.emit(Event::new(
            "tool:start",
            serde_json::json!({ "tool_id": tool_id, "input": input.clone() }),
        ));
        let outcome = self.invoke_inner(tool_id, input, granted, budget).await;
        match &outcome {
            Ok(value) => self.bus.emit(Event::new(
                "tool:success",
                serde_json::json!({ "tool_id": tool_id, "result": value }),
            )),
            Err(err) => self.bus.emit(Event::new(
                "tool:error",
                serde_json::json!({ "tool_id": tool_id, "error": err.to_string() }),
            )),
        }
        outcome
    }

    async fn invoke_inner(
        self: &Arc<Self>,
        tool_id: &str,
        input: Value,
        granted: Vec<Capability>,
        budget: Duration,
    ) -> Result<Value, ToolError> {
        let def = self.registry.resolve(tool_id)?;
        schema::validate(&def.input_schema, &input)?;
        for required in &def.capabilities {
            if !satisfies(&granted, required) {
                return Err(ToolError::CapabilityDenied(required.to_string()));
            }
        }

        let body = self.registry.resolve_body(tool_id)?;
        let deadline = budget.min(self.default_timeout);
        let ctx = ToolContext {
            vfs: Arc::clone(&self.vfs),
            capabilities: granted,
            remaining_budget: deadline,
            runner: Arc::clone(self),
        };

        match tokio::time::timeout(deadline, body.call(input, &ctx)).await {
            Err(_) => Err(ToolError::Timeout(deadline.as_millis() as u64)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(value)) => {
                let encoded_len = serde_json::to_vec(&value).map(|b| b.len()).unwrap_or(0);
                if encoded_len > self.output_ceiling_bytes {
                    Err(ToolError::OutputTooLarge(self.output_ceiling_bytes))
                } else {
                    Ok(value)
                }
            }
        }
    }
}
