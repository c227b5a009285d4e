use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::{Event, HANDLER_ERROR_TOPIC};

type Handler = dyn Fn(&Event) + Send + Sync;

struct Entry {
    id: u64,
    pattern: String,
    handler: Arc<Handler>,
}

/// A token returned by [`EventBus::on`], needed to unsubscribe via
/// [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// Single-threaded cooperative pub/sub bus.
///
/// FIFO delivery per topic is guaranteed: handlers for a topic fire in the
/// order they were registered, and a single subscriber never observes two
/// emits to the same topic out of order (emit holds the entry list snapshot
/// for the duration of dispatch, and dispatch is synchronous).
pub struct EventBus {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `pattern`. `pattern` is either an exact topic
    /// (`"vfs:write"`), a family wildcard (`"vfs:*"`), or `"*"` for every
    /// event.
    pub fn on<F>(&self, pattern: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry {
            id,
            pattern: pattern.into(),
            handler: Arc::new(handler),
        });
        Subscription(id)
    }

    /// Remove a previously registered handler. No-op if already removed.
    pub fn off(&self, subscription: Subscription) {
        self.entries.lock().retain(|e| e.id != subscription.0);
    }

    /// Emit `event` to every handler whose pattern matches its topic, in
    /// registration order. Panicking handlers are caught and reported as
    /// `bus:handler_error`; they never stop later handlers from running.
    pub fn emit(&self, event: Event) {
        // Snapshot under the lock, then release it before invoking handlers
        // so a handler that calls `emit`/`on`/`off` reentrantly never
        // deadlocks against this call.
        let matching: Vec<Arc<Handler>> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|e| topic_matches(&e.pattern, &event.topic))
                .map(|e| Arc::clone(&e.handler))
                .collect()
        };

        for handler in matching {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if let Err(panic_payload) = result {
                let message = panic_message(&panic_payload);
                if event.topic != HANDLER_ERROR_TOPIC {
                    self.emit(Event::new(
                        HANDLER_ERROR_TOPIC,
                        json!({ "topic": event.topic, "message": message }),
                    ));
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" || pattern == topic {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return topic.starts_with(prefix);
    }
    false
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        bus.on("vfs:write", move |_| o1.lock().push(1));
        let o2 = Arc::clone(&order);
        bus.on("vfs:write", move |_| o2.lock().push(2));

        bus.emit(Event::new("vfs:write", json!({})));
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn wildcard_pattern_matches_family() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.on("vfs:*", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::new("vfs:write", json!({})));
        bus.emit(Event::new("vfs:delete", json!({})));
        bus.emit(Event::new("tool:start", json!({})));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn off_removes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = bus.on("cycle:halt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::new("cycle:halt", json!({})));
        bus.off(sub);
        bus.emit(Event::new("cycle:halt", json!({})));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_later_handlers() {
        let bus = EventBus::new();
        bus.on("tool:start", |_| panic!("boom"));
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        bus.on("tool:start", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let error_count = Arc::new(AtomicUsize::new(0));
        let ec = Arc::clone(&error_count);
        bus.on(HANDLER_ERROR_TOPIC, move |_| {
            ec.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::new("tool:start", json!({})));

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(error_count.load(Ordering::SeqCst), 1);
    }
}
