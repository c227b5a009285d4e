//! Audit/Replay Log: an append-only record of every event
//! on the bus, tagged with wall-clock time and the VFS's logical clock at
//! the moment of recording, exportable as a bundle and replayable against
//! a fresh composition root. Grounded on the dual `InMemoryStore`/
//! `SqliteMemoryStore` persistence split (`memory/store.rs`,
//! `memory/sqlite_store.rs`): the in-memory `Vec` is always kept (replay
//! and export work without a database), and an optional SQLite-backed
//! table mirrors every append for durability across process restarts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_bus::{Event, EventBus, Subscription};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub logical_clock: u64,
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditBundle {
    pub events: Vec<AuditEvent>,
}

pub struct AuditLog {
    events: Mutex<Vec<AuditEvent>>,
    next_seq: AtomicU64,
    clock_fn: Box<dyn Fn() -> u64 + Send + Sync>,
    #[cfg(feature = "sqlite")]
    sqlite: Option<Mutex<rusqlite::Connection>>,
}

impl AuditLog {
    /// `clock_fn` supplies the logical clock value to stamp each recorded
    /// event with (typically `InMemoryVfs::current_clock`), kept as an
    /// injected closure so the log has no direct dependency on the VFS.
    pub fn new(clock_fn: impl Fn() -> u64 + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            clock_fn: Box::new(clock_fn),
            #[cfg(feature = "sqlite")]
            sqlite: None,
        })
    }

    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(
        clock_fn: impl Fn() -> u64 + Send + Sync + 'static,
        path: &str,
    ) -> Result<Arc<Self>, crate::error::ReploidError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| crate::error::ReploidError::Config(format!("opening audit db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| crate::error::ReploidError::Config(format!("audit schema: {e}")))?;
        Ok(Arc::new(Self {
            events: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            clock_fn: Box::new(clock_fn),
            sqlite: Some(Mutex::new(conn)),
        }))
    }

    /// Subscribe to every topic on `bus` and record each one. Returns the
    /// subscription handle so the caller can `off` it to pause recording.
    pub fn install(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        let this = Arc::clone(self);
        bus.on("*", move |event: &Event| {
            this.record(event.topic.clone(), event.payload.clone());
        })
    }

    pub fn record(&self, topic: impl Into<String>, payload: Value) -> AuditEvent {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = AuditEvent {
            seq,
            ts: Utc::now(),
            logical_clock: (self.clock_fn)(),
            topic: topic.into(),
            payload,
        };
        self.events.lock().push(entry.clone());
        self.persist(&entry);
        entry
    }

    #[cfg(feature = "sqlite")]
    fn persist(&self, entry: &AuditEvent) {
        let Some(conn) = &self.sqlite else { return };
        let conn = conn.lock();
        let payload = entry.payload.to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO audit_events (seq, ts, logical_clock, topic, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![entry.seq as i64, entry.ts.to_rfc3339(), entry.logical_clock as i64, entry.topic, payload],
        ) {
            tracing::warn!("audit log: failed to persist event {}: {e}", entry.seq);
        }
    }

    #[cfg(not(feature = "sqlite"))]
    fn persist(&self, _entry: &AuditEvent) {}

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn export_run(&self) -> AuditBundle {
        AuditBundle {
            events: self.events(),
        }
    }

    /// Append every event in `bundle` to the in-memory log, preserving its
    /// recorded `seq`/`ts`/`logical_clock` rather than re-stamping it. Used
    /// to load a previously exported run before replaying it.
    pub fn import_run(&self, bundle: AuditBundle) {
        let mut events = self.events.lock();
        let max_seq = bundle.events.iter().map(|e| e.seq).max().unwrap_or(0);
        events.extend(bundle.events);
        self.next_seq.fetch_max(max_seq + 1, Ordering::SeqCst);
    }

    /// Drive `handler` with every recorded event in sequence order. A
    /// composition root replays a run by feeding each event's payload back
    /// through its own components (e.g. substituting a `RecordedLlmClient`
    /// for the live one so the same tool calls are replayed deterministically).
    pub fn replay(&self, mut handler: impl FnMut(&AuditEvent)) {
        let mut events = self.events();
        events.sort_by_key(|e| e.seq);
        for event in &events {
            handler(event);
        }
    }
}

#[cfg(feature = "sqlite")]
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS audit_events (
    seq INTEGER PRIMARY KEY,
    ts TEXT NOT NULL,
    logical_clock INTEGER NOT NULL,
    topic TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_events_topic ON audit_events (topic);
"#;
