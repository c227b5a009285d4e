//! In-memory [`Vfs`] implementation.
//!
//! Mirrors the `InMemoryStore` shape (a `RwLock<HashMap>` guarded store
//! with a pluggable identity), generalized from memory records to VFS
//! file entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::{ChangeSetEntry, ExportBundle, FileEntry, Stat, Vfs, VfsEvent, VfsPath, WatchHandler};
use crate::error::VfsError;

struct Watcher {
    id: u64,
    prefix: String,
    handler: Arc<dyn Fn(VfsEvent) + Send + Sync>,
}

/// Thread-safe, in-memory VFS backed by a `HashMap`.
pub struct InMemoryVfs {
    entries: RwLock<HashMap<String, FileEntry>>,
    watchers: Mutex<Vec<Watcher>>,
    next_watch_id: AtomicU64,
    clock: AtomicU64,
    peer_id: String,
    read_ceiling_bytes: u64,
    total_quota_bytes: u64,
}

impl InMemoryVfs {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self::with_limits(peer_id, 1024 * 1024, 512 * 1024 * 1024)
    }

    pub fn with_limits(
        peer_id: impl Into<String>,
        read_ceiling_bytes: u64,
        total_quota_bytes: u64,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            peer_id: peer_id.into(),
            read_ceiling_bytes,
            total_quota_bytes,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Advance the Lamport clock to at least `other + 1`, as swarm sync
    /// requires on receiving a remote entry.
    pub fn observe_clock(&self, other: u64) {
        self.clock.fetch_max(other, Ordering::SeqCst);
        self.clock.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current_clock(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn is_readonly(path: &VfsPath) -> bool {
        path.is_under(super::SNAPSHOTS_PREFIX)
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

    fn total_size(entries: &HashMap<String, FileEntry>) -> u64 {
        entries.values().map(FileEntry::size).sum()
    }

    /// Insert an entry that arrived from a peer, honoring LWW semantics
    /// directly (clock/peer already decided by the caller). Used by swarm
    /// sync so merges go through the same storage path as local writes,
    /// without re-incrementing the local clock.
    pub fn merge_entry(&self, entry: FileEntry) -> bool {
        let mut entries = self.entries.write();
        let should_apply = match entries.get(&entry.path) {
            None => true,
            Some(existing) => {
                entry.logical_clock > existing.logical_clock
                    || (entry.logical_clock == existing.logical_clock
                        && entry.origin_peer > existing.origin_peer)
            }
        };
        if should_apply {
            self.clock.fetch_max(entry.logical_clock, Ordering::SeqCst);
            entries.insert(entry.path.clone(), entry);
        }
        should_apply
    }
}

#[async_trait]
impl Vfs for InMemoryVfs {
    async fn read(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let parsed = VfsPath::parse(path)?;
        let entries = self.entries.read();
        let entry = entries
            .get(parsed.as_str())
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        if entry.size() > self.read_ceiling_bytes {
            return Err(VfsError::FileTooLarge {
                path: path.to_string(),
                size: entry.size(),
                ceiling: self.read_ceiling_bytes,
            });
        }
        Ok(entry.content.clone())
    }

    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        if Self::is_readonly(&parsed) {
            return Err(VfsError::Readonly(path.to_string()));
        }
        let incoming = bytes.len() as u64;
        {
            let entries = self.entries.read();
            let used = Self::total_size(&entries);
            let previous = entries.get(parsed.as_str()).map(FileEntry::size).unwrap_or(0);
            let projected = used - previous + incoming;
            if projected > self.total_quota_bytes {
                return Err(VfsError::QuotaExceeded {
                    used,
                    incoming,
                    quota: self.total_quota_bytes,
                });
            }
        }
        let clock = self.tick();
        let entry = FileEntry {
            path: parsed.as_str().to_string(),
            content: bytes,
            updated_at: Utc::now(),
            logical_clock: clock,
            origin_peer: self.peer_id.clone(),
        };
        self.entries.write().insert(parsed.as_str().to_string(), entry);
        self.notify(VfsEvent::Write {
            path: parsed.as_str().to_string(),
        });
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Stat, VfsError> {
        let parsed = VfsPath::parse(path)?;
        let entries = self.entries.read();
        entries
            .get(parsed.as_str())
            .map(Stat::from)
            .ok_or_else(|| VfsError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        if Self::is_readonly(&parsed) {
            return Err(VfsError::Readonly(path.to_string()));
        }
        let removed = self.entries.write().remove(parsed.as_str());
        if removed.is_none() {
            return Err(VfsError::NotFound(path.to_string()));
        }
        self.tick();
        self.notify(VfsEvent::Delete {
            path: parsed.as_str().to_string(),
        });
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, VfsError> {
        let entries = self.entries.read();
        let mut matches: Vec<String> = entries
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        matches.sort();
        Ok(matches)
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
        let entries = self.entries.read().clone();
        let clone = InMemoryVfs::with_limits(
            self.peer_id.clone(),
            self.read_ceiling_bytes,
            self.total_quota_bytes,
        );
        clone.clock.store(self.clock.load(Ordering::SeqCst), Ordering::SeqCst);
        *clone.entries.write() = entries;
        Box::new(clone)
    }

    async fn export_all(&self) -> Result<ExportBundle, VfsError> {
        let entries = self.entries.read();
        let mut files: Vec<FileEntry> = entries.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(ExportBundle { files })
    }

    async fn import_all(&self, bundle: ExportBundle, clear_first: bool) -> Result<(), VfsError> {
        let mut entries = self.entries.write();
        if clear_first {
            entries.clear();
        }
        for file in bundle.files {
            self.clock.fetch_max(file.logical_clock, Ordering::SeqCst);
            entries.insert(file.path.clone(), file);
        }
        Ok(())
    }

    async fn apply_batch(&self, change_set: Vec<ChangeSetEntry>) -> Result<(), VfsError> {
        // Validate every entry before mutating anything so the batch is
        // atomic: all writes succeed together or none do.
        let mut parsed_entries = Vec::with_capacity(change_set.len());
        for change in &change_set {
            let parsed = VfsPath::parse(change.path())?;
            if Self::is_readonly(&parsed) {
                return Err(VfsError::Readonly(change.path().to_string()));
            }
            parsed_entries.push(parsed);
        }

        {
            let entries = self.entries.read();
            let mut projected = Self::total_size(&entries);
            for (change, parsed) in change_set.iter().zip(&parsed_entries) {
                let previous = entries.get(parsed.as_str()).map(FileEntry::size).unwrap_or(0);
                projected -= previous;
                if let ChangeSetEntry::Write { bytes, .. } = change {
                    projected += bytes.len() as u64;
                }
            }
            if projected > self.total_quota_bytes {
                return Err(VfsError::QuotaExceeded {
                    used: Self::total_size(&entries),
                    incoming: projected,
                    quota: self.total_quota_bytes,
                });
            }
        }

        let mut entries = self.entries.write();
        let mut events = Vec::with_capacity(change_set.len());
        for (change, parsed) in change_set.into_iter().zip(parsed_entries) {
            let clock = self.tick();
            match change {
                ChangeSetEntry::Write { bytes, .. } => {
                    entries.insert(
                        parsed.as_str().to_string(),
                        FileEntry {
                            path: parsed.as_str().to_string(),
                            content: bytes,
                            updated_at: Utc::now(),
                            logical_clock: clock,
                            origin_peer: self.peer_id.clone(),
                        },
                    );
                    events.push(VfsEvent::Write {
                        path: parsed.as_str().to_string(),
                    });
                }
                ChangeSetEntry::Delete { .. } => {
                    entries.remove(parsed.as_str());
                    events.push(VfsEvent::Delete {
                        path: parsed.as_str().to_string(),
                    });
                }
            }
        }
        drop(entries);
        for event in events {
            self.notify(event);
        }
        Ok(())
    }

    async fn write_raw(&self, path: &str, bytes: Vec<u8>) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        let clock = self.tick();
        let entry = FileEntry {
            path: parsed.as_str().to_string(),
            content: bytes,
            updated_at: Utc::now(),
            logical_clock: clock,
            origin_peer: self.peer_id.clone(),
        };
        self.entries.write().insert(parsed.as_str().to_string(), entry);
        self.notify(VfsEvent::Write {
            path: parsed.as_str().to_string(),
        });
        Ok(())
    }

    async fn delete_raw(&self, path: &str) -> Result<(), VfsError> {
        let parsed = VfsPath::parse(path)?;
        self.entries.write().remove(parsed.as_str());
        self.tick();
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
        let vfs = InMemoryVfs::new("p1");
        vfs.write("/a/b", b"hello".to_vec()).await.unwrap();
        assert_eq!(vfs.read("/a/b").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn stat_size_matches_read_length() {
        let vfs = InMemoryVfs::new("p1");
        vfs.write("/a", b"12345".to_vec()).await.unwrap();
        let stat = vfs.stat("/a").await.unwrap();
        assert_eq!(stat.size, vfs.read("/a").await.unwrap().len() as u64);
    }

    #[tokio::test]
    async fn logical_clock_is_strictly_monotonic_per_path() {
        let vfs = InMemoryVfs::new("p1");
        vfs.write("/a", b"1".to_vec()).await.unwrap();
        let c1 = vfs.stat("/a").await.unwrap().logical_clock;
        vfs.write("/a", b"2".to_vec()).await.unwrap();
        let c2 = vfs.stat("/a").await.unwrap().logical_clock;
        assert!(c2 > c1);
    }

    #[tokio::test]
    async fn snapshots_prefix_is_readonly() {
        let vfs = InMemoryVfs::new("p1");
        let err = vfs.write("/.snapshots/genesis/x", b"x".to_vec()).await;
        assert!(matches!(err, Err(VfsError::Readonly(_))));
        let err = vfs.delete("/.snapshots/genesis/x").await;
        assert!(matches!(err, Err(VfsError::Readonly(_))));
    }

    #[tokio::test]
    async fn file_too_large_blocks_read_not_write() {
        let vfs = InMemoryVfs::with_limits("p1", 4, 1024);
        vfs.write("/big", vec![0u8; 5]).await.unwrap();
        let err = vfs.read("/big").await;
        assert!(matches!(err, Err(VfsError::FileTooLarge { .. })));
    }

    #[tokio::test]
    async fn quota_exceeded_rejects_write() {
        let vfs = InMemoryVfs::with_limits("p1", 1024, 10);
        let err = vfs.write("/a", vec![0u8; 11]).await;
        assert!(matches!(err, Err(VfsError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn list_is_lexically_ordered() {
        let vfs = InMemoryVfs::new("p1");
        vfs.write("/b", b"".to_vec()).await.unwrap();
        vfs.write("/a", b"".to_vec()).await.unwrap();
        vfs.write("/c", b"".to_vec()).await.unwrap();
        assert_eq!(vfs.list("/").await.unwrap(), vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn clone_is_independent_of_parent() {
        let vfs = InMemoryVfs::new("p1");
        vfs.write("/a", b"1".to_vec()).await.unwrap();
        let clone = vfs.clone_vfs();
        clone.write("/a", b"2".to_vec()).await.unwrap();
        assert_eq!(vfs.read("/a").await.unwrap(), b"1");
        assert_eq!(clone.read("/a").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let vfs = InMemoryVfs::new("p1");
        vfs.write("/a", b"1".to_vec()).await.unwrap();
        vfs.write("/b", b"2".to_vec()).await.unwrap();
        let bundle = vfs.export_all().await.unwrap();

        let other = InMemoryVfs::new("p2");
        other.import_all(bundle.clone(), true).await.unwrap();
        let reimported = other.export_all().await.unwrap();
        assert_eq!(bundle.files, reimported.files);
    }

    #[tokio::test]
    async fn apply_batch_is_all_or_nothing() {
        let vfs = InMemoryVfs::with_limits("p1", 1024, 10);
        let result = vfs
            .apply_batch(vec![
                ChangeSetEntry::Write {
                    path: "/a".into(),
                    bytes: vec![0u8; 5],
                },
                ChangeSetEntry::Write {
                    path: "/b".into(),
                    bytes: vec![0u8; 20],
                },
            ])
            .await;
        assert!(result.is_err());
        let export = vfs.export_all().await.unwrap();
        assert!(export.files.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let vfs = InMemoryVfs::new("p1");
        vfs.write("/a", b"1".to_vec()).await.unwrap();
        let before = vfs.export_all().await.unwrap();
        vfs.apply_batch(vec![]).await.unwrap();
        let after = vfs.export_all().await.unwrap();
        assert_eq!(before.files, after.files);
    }

    #[tokio::test]
    async fn watch_fires_on_writes_under_prefix() {
        let vfs = InMemoryVfs::new("p1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        vfs.watch(
            "/tools",
            Box::new(move |event| {
                if let VfsEvent::Write { path } = event {
                    s.lock().push(path);
                }
            }),
        );
        vfs.write("/tools/Add", b"".to_vec()).await.unwrap();
        vfs.write("/memory/x", b"".to_vec()).await.unwrap();
        assert_eq!(*seen.lock(), vec!["/tools/Add".to_string()]);
    }

    #[test]
    fn lww_merge_prefers_higher_clock() {
        let vfs = InMemoryVfs::new("p1");
        let older = FileEntry {
            path: "/shared.txt".into(),
            content: b"old".to_vec(),
            updated_at: Utc::now(),
            logical_clock: 5,
            origin_peer: "p2".into(),
        };
        let newer = FileEntry {
            path: "/shared.txt".into(),
            content: b"new".to_vec(),
            updated_at: Utc::now(),
            logical_clock: 7,
            origin_peer: "p2".into(),
        };
        assert!(vfs.merge_entry(older.clone()));
        assert!(vfs.merge_entry(newer.clone()));
        // Stale entry after a newer one has already landed is discarded.
        assert!(!vfs.merge_entry(older));
    }
}
