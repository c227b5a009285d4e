//! In-process, single-threaded cooperative pub/sub.
//!
//! Handlers registered for a topic run in registration order on every
//! `emit`. A handler that panics is caught and re-surfaced as a
//! `bus:handler_error` event rather than unwinding the emitter, and never
//! prevents later handlers for the same emit from running.

mod bus;

pub use bus::{EventBus, Subscription};

use serde_json::Value;

/// A published event: a dotted topic string plus an arbitrary JSON payload.
///
/// Stable topic namespaces: `cycle:*`, `vfs:*`, `tool:*`, `verification:*`,
/// `approval:*`, `swarm:*`, `bus:handler_error`.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Topic emitted when a handler panics while processing another topic.
pub const HANDLER_ERROR_TOPIC: &str = "bus:handler_error";
