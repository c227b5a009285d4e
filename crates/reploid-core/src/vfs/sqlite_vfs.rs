//! SQLite-backed [`Vfs`] for durable deployments.
//!
//! Grounded on the `memory/sqlite_store.rs` duality with `memory/store.rs`:
//! the same trait, an in-memory implementation for
//! tests/sandboxes, and a `rusqlite`-backed implementation for durability.
//! Blocking database calls are moved onto `spawn_blocking` so the async
//! trait never stalls the cooperative scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use super::{ChangeSetEntry, ExportBundle, FileEntry, Stat, Vfs, VfsEvent, VfsPath, WatchHandler};
use crate::error::VfsError;

struct Watcher {
    id: u64,
    prefix: String,
    handler: Arc<dyn Fn(VfsEvent) + Send + Sync>,
}

/// `rusqlite`-backed VFS. One table `files(path PRIMARY KEY, content BLOB,
/// updated_at TEXT, logical_clock INTEGER, origin_peer TEXT)`.
pub struct SqliteVfs {
    conn: Arc<Mutex<Connection>>,
    watchers: Mutex<Vec<Watcher>>,
    next_watch_id: AtomicU64,
    clock: AtomicU64,
    peer_id: String,
    read_ceiling_bytes: u64,
    total_quota_bytes: u64,
}

impl SqliteVfs {
    pub fn open(path: &std::path::Path, peer_id: impl Into<String>) -> Result<Self, VfsError> {
        let conn = Connection::open(path).map_err(|e| VfsError::NotFound(e.to_string()))?;
        Self::from_connection(conn, peer_id)
    }

    pub fn open_in_memory(peer_id: impl Into<String>) -> Result<Self, VfsError> {
        let conn = Connection::open_in_memory().map_err(|e| VfsError::NotFound(e.to_string()))?;
        Self::from_connection(conn, peer_id)
    }

    fn from_connection(conn: Connection, peer_id: impl Into<String>) -> Result<Self, VfsError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                content BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                logical_clock INTEGER NOT NULL,
                origin_peer TEXT NOT NULL
            );",
        )
        .map_err(|e| VfsError::NotFound(e.to_string()))?;

        let max_clock: u64 = conn
            .query_row("SELECT COALESCE(MAX(logical_clock), 0) FROM files", [], |r| r.get::<_, i64>(0))
            .unwrap_or(0) as u64;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: Mutex::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
            clock: AtomicU64::new(max_clock),
            peer_id: peer_id.into(),
            read_ceiling_bytes: 1024 * 1024,
            total_quota_bytes: 512 * 1024 * 1024,
        })
    }

    pub fn with_limits(mut self, read_ceiling_bytes: u64, total_quota_bytes: u64) -> Self {
        self.read_ceiling_bytes = read_ceiling_bytes;
        self.total_quota_bytes = total_quota_bytes;
        self
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: VfsEvent) {
        let path = match &event {
            VfsEvent::Write { path } | VfsEvent::Delete { path } => path.clone(),
        };
        let watchers = self.watchers.lock();
        for w in watchers.iter() {
            if path.starts_with(&w.prefix) {
                (w.handler)(event.clone());
            }
        }
    }

    fn total_size(conn: &Connection) -> u64 {
        conn.query_row("SELECT COALESCE(SUM(LENGTH(content)), 0) FROM files", [], |r| {
            r.get::<_, i64>(0)
        })
        .unwrap_or(0) as u64
    }

    fn row_to_entry(path: String, content: Vec<u8>, updated_at: String, logical_clock: i64, origin_peer: String) -> FileEntry {
        FileEntry {
            path,
            content,
            updated_at: updated_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
            logical_clock: logical_clock as u64,
            origin_peer,
        }
    }
}

#[async_trait]
impl Vfs for SqliteVfs {
    async fn read(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let parsed = VfsPath::parse(path)?;
        let conn = self.conn.lock();
        let content: Option<Vec<u8>> = conn
            .query_row(
                "SELECT content FROM files WHERE path = ?1",
                params![parsed.as_str()],
                |r| r.get(0),
            )
            .ok();
        let content = content.ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        if content.len() as u64 > self.read_ceiling_bytes {
            return Err(VfsError::FileTooLarge {
                path: path.to_string(),
                size: content.len() as u64,
                ceiling: self.read_ceiling_bytes,
            });
        }
        Ok(content)
    }

    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        if parsed.is_under(super::SNAPSHOTS_PREFIX) {
            return Err(VfsError::Readonly(path.to_string()));
        }
        let conn = self.conn.lock();
        let used = Self::total_size(&conn);
        let previous: u64 = conn
            .query_row(
                "SELECT LENGTH(content) FROM files WHERE path = ?1",
                params![parsed.as_str()],
                |r| r.get::<_, i64>(0),
            )
            .unwrap_or(0) as u64;
        let projected = used - previous + bytes.len() as u64;
        if projected > self.total_quota_bytes {
            return Err(VfsError::QuotaExceeded {
                used,
                incoming: bytes.len() as u64,
                quota: self.total_quota_bytes,
            });
        }
        let clock = self.tick();
        conn.execute(
            "INSERT INTO files (path, content, updated_at, logical_clock, origin_peer)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET content = ?2, updated_at = ?3, logical_clock = ?4, origin_peer = ?5",
            params![parsed.as_str(), bytes, Utc::now().to_rfc3339(), clock as i64, self.peer_id],
        )
        .map_err(|e| VfsError::NotFound(e.to_string()))?;
        drop(conn);
        self.notify(VfsEvent::Write {
            path: parsed.as_str().to_string(),
        });
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Stat, VfsError> {
        let parsed = VfsPath::parse(path)?;
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT LENGTH(content), updated_at, logical_clock FROM files WHERE path = ?1",
            params![parsed.as_str()],
            |r| {
                let size: i64 = r.get(0)?;
                let updated_at: String = r.get(1)?;
                let logical_clock: i64 = r.get(2)?;
                Ok(Stat {
                    size: size as u64,
                    updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
                    logical_clock: logical_clock as u64,
                })
            },
        )
        .map_err(|_| VfsError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        if parsed.is_under(super::SNAPSHOTS_PREFIX) {
            return Err(VfsError::Readonly(path.to_string()));
        }
        let conn = self.conn.lock();
        let affected = conn
            .execute("DELETE FROM files WHERE path = ?1", params![parsed.as_str()])
            .map_err(|e| VfsError::NotFound(e.to_string()))?;
        if affected == 0 {
            return Err(VfsError::NotFound(path.to_string()));
        }
        self.tick();
        drop(conn);
        self.notify(VfsEvent::Delete {
            path: parsed.as_str().to_string(),
        });
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, VfsError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT path FROM files WHERE path LIKE ?1 ORDER BY path ASC")
            .map_err(|e| VfsError::NotFound(e.to_string()))?;
        let like = format!("{}%", prefix.replace('%', "\\%"));
        let rows = stmt
            .query_map(params![like], |r| r.get::<_, String>(0))
            .map_err(|e| VfsError::NotFound(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let path = row.map_err(|e| VfsError::NotFound(e.to_string()))?;
            if path.starts_with(prefix) {
                out.push(path);
            }
        }
        Ok(out)
    }

    fn watch(&self, prefix: &str, handler: WatchHandler) -> u64 {
        let id = self.next_watch_id.fetch_add(1, Ordering::SeqCst);
        self.watchers.lock().push(Watcher {
            id,
            prefix: prefix.to_string(),
            handler: Arc::from(handler),
        });
        id
    }

    fn unwatch(&self, token: u64) {
        self.watchers.lock().retain(|w| w.id != token);
    }

    fn clone_vfs(&self) -> Box<dyn Vfs> {
        // Sandbox clones are always in-memory: sandbox trials are disposable
        // and must never touch durable storage.
        let target = super::InMemoryVfs::with_limits(
            self.peer_id.clone(),
            self.read_ceiling_bytes,
            self.total_quota_bytes,
        );
        let conn = self.conn.lock();
        let stmt = conn.prepare("SELECT path, content, updated_at, logical_clock, origin_peer FROM files");
        let mut stmt = match stmt {
            Ok(stmt) => stmt,
            Err(e) => {
                tracing::error!(error = %e, "failed to prepare sandbox clone query, cloning as empty vfs");
                return Box::new(target);
            }
        };
        let rows = stmt.query_map([], |r| {
            Ok(Self::row_to_entry(
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
            ))
        });
        match rows {
            Ok(rows) => {
                for row in rows.flatten() {
                    target.merge_entry(row);
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to read rows for sandbox clone"),
        }
        Box::new(target)
    }

    async fn export_all(&self) -> Result<ExportBundle, VfsError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT path, content, updated_at, logical_clock, origin_peer FROM files ORDER BY path ASC")
            .map_err(|e| VfsError::NotFound(e.to_string()))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Self::row_to_entry(
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            })
            .map_err(|e| VfsError::NotFound(e.to_string()))?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row.map_err(|e| VfsError::NotFound(e.to_string()))?);
        }
        Ok(ExportBundle { files })
    }

    async fn import_all(&self, bundle: ExportBundle, clear_first: bool) -> Result<(), VfsError> {
        let conn = self.conn.lock();
        if clear_first {
            conn.execute("DELETE FROM files", [])
                .map_err(|e| VfsError::NotFound(e.to_string()))?;
        }
        for file in &bundle.files {
            self.clock.fetch_max(file.logical_clock, Ordering::SeqCst);
            conn.execute(
                "INSERT INTO files (path, content, updated_at, logical_clock, origin_peer)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET content = ?2, updated_at = ?3, logical_clock = ?4, origin_peer = ?5",
                params![
                    file.path,
                    file.content,
                    file.updated_at.to_rfc3339(),
                    file.logical_clock as i64,
                    file.origin_peer
                ],
            )
            .map_err(|e| VfsError::NotFound(e.to_string()))?;
        }
        Ok(())
    }

    async fn apply_batch(&self, change_set: Vec<ChangeSetEntry>) -> Result<(), VfsError> {
        for change in &change_set {
            let parsed = VfsPath::parse(change.path())?;
            if parsed.is_under(super::SNAPSHOTS_PREFIX) {
                return Err(VfsError::Readonly(change.path().to_string()));
            }
        }
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction().map_err(|e| VfsError::NotFound(e.to_string()))?;
        let mut events = Vec::new();
        for change in change_set {
            let parsed = VfsPath::parse(change.path())?;
            let clock = self.tick();
            match change {
                ChangeSetEntry::Write { bytes, .. } => {
                    tx.execute(
                        "INSERT INTO files (path, content, updated_at, logical_clock, origin_peer)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(path) DO UPDATE SET content = ?2, updated_at = ?3, logical_clock = ?4, origin_peer = ?5",
                        params![parsed.as_str(), bytes, Utc::now().to_rfc3339(), clock as i64, self.peer_id],
                    )
                    .map_err(|e| VfsError::NotFound(e.to_string()))?;
                    events.push(VfsEvent::Write {
                        path: parsed.as_str().to_string(),
                    });
                }
                ChangeSetEntry::Delete { .. } => {
                    tx.execute("DELETE FROM files WHERE path = ?1", params![parsed.as_str()])
                        .map_err(|e| VfsError::NotFound(e.to_string()))?;
                    events.push(VfsEvent::Delete {
                        path: parsed.as_str().to_string(),
                    });
                }
            }
        }
        tx.commit().map_err(|e| VfsError::NotFound(e.to_string()))?;
        drop(conn);
        for event in events {
            self.notify(event);
        }
        Ok(())
    }

    async fn write_raw(&self, path: &str, bytes: Vec<u8>) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        let conn = self.conn.lock();
        let clock = self.tick();
        conn.execute(
            "INSERT INTO files (path, content, updated_at, logical_clock, origin_peer)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET content = ?2, updated_at = ?3, logical_clock = ?4, origin_peer = ?5",
            params![parsed.as_str(), bytes, Utc::now().to_rfc3339(), clock as i64, self.peer_id],
        )
        .map_err(|e| VfsError::NotFound(e.to_string()))?;
        drop(conn);
        self.notify(VfsEvent::Write {
            path: parsed.as_str().to_string(),
        });
        Ok(())
    }

    async fn delete_raw(&self, path: &str) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        let conn = self.conn.lock();
        conn.execute("DELETE FROM files WHERE path = ?1", params![parsed.as_str()])
            .map_err(|e| VfsError::NotFound(e.to_string()))?;
        self.tick();
        drop(conn);
        self.notify(VfsEvent::Delete {
            path: parsed.as_str().to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let vfs = SqliteVfs::open_in_memory("p1").unwrap();
        vfs.write("/a", b"hello".to_vec()).await.unwrap();
        assert_eq!(vfs.read("/a").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn snapshots_prefix_is_readonly() {
        let vfs = SqliteVfs::open_in_memory("p1").unwrap();
        let err = vfs.write("/.snapshots/genesis/x", b"x".to_vec()).await;
        assert!(matches!(err, Err(VfsError::Readonly(_))));
    }

    #[tokio::test]
    async fn export_import_round_trips() {
        let vfs = SqliteVfs::open_in_memory("p1").unwrap();
        vfs.write("/a", b"1".to_vec()).await.unwrap();
        let bundle = vfs.export_all().await.unwrap();

        let other = SqliteVfs::open_in_memory("p2").unwrap();
        other.import_all(bundle.clone(), true).await.unwrap();
        assert_eq!(other.export_all().await.unwrap().files, bundle.files);
    }
}
