//! Snapshot Store: point-in-time copies of the live VFS tree, stored under
//! `/.snapshots/<name>/` and read back out through the same `Vfs` trait.
//!
//! Grounded on the config/state persistence duality `memory/store.rs` and
//! `memory/sqlite_store.rs` share (one store, swappable in-memory or
//! durable backing), generalized from key-value state to whole-tree
//! copies. `genesis` is sealed the first time it is created: a marker file
//! under its own prefix makes the seal durable across process restarts,
//! the same way one-time setup flags get persisted to disk rather than
//! trusted to in-process state alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SnapshotError, VfsError};
use crate::vfs::{Vfs, GENESIS_SNAPSHOT, SNAPSHOTS_PREFIX};

const SEALED_MARKER: &str = ".sealed";

/// The result of comparing two snapshots path-by-path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

pub struct SnapshotStore {
    vfs: Arc<dyn Vfs>,
    genesis_sealed: AtomicBool,
}

impl SnapshotStore {
    pub fn new(vfs: Arc<dyn Vfs>) -> Self {
        Self {
            vfs,
            genesis_sealed: AtomicBool::new(false),
        }
    }

    fn prefix(name: &str) -> String {
        format!("{SNAPSHOTS_PREFIX}/{name}")
    }

    /// `list` matches by raw string prefix, so `/.snapshots/a` would also
    /// match `/.snapshots/ab/...`. Listing contents always goes through
    /// this trailing-slash form instead.
    fn list_prefix(name: &str) -> String {
        format!("{}/", Self::prefix(name))
    }

    async fn genesis_is_sealed(&self) -> Result<bool, SnapshotError> {
        if self.genesis_sealed.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let marker = format!("{}/{SEALED_MARKER}", Self::prefix(GENESIS_SNAPSHOT));
        match self.vfs.stat(&marker).await {
            Ok(_) => {
                self.genesis_sealed.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Err(VfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy every live path (excluding `/.snapshots/...`) into
    /// `/.snapshots/<name>/...`. Fails if `name` already has content, or if
    /// `name` is `genesis` and genesis has already been sealed once.
    pub async fn create(&self, name: &str) -> Result<(), SnapshotError> {
        if name == GENESIS_SNAPSHOT && self.genesis_is_sealed().await? {
            return Err(SnapshotError::GenesisImmutable("re-created".into()));
        }
        let prefix = Self::prefix(name);
        if !self.vfs.list(&Self::list_prefix(name)).await?.is_empty() {
            return Err(SnapshotError::AlreadyExists(name.to_string()));
        }

        let live_paths = self.vfs.list("/").await?;
        for path in live_paths {
            if path.starts_with(SNAPSHOTS_PREFIX) {
                continue;
            }
            let content = self.vfs.read(&path).await?;
            self.vfs.write_raw(&format!("{prefix}{path}"), content).await?;
        }

        if name == GENESIS_SNAPSHOT {
            self.vfs
                .write_raw(&format!("{prefix}/{SEALED_MARKER}"), Vec::new())
                .await?;
            self.genesis_sealed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Replace every live path outside `/.snapshots/...` with the contents
    /// of snapshot `name`.
    pub async fn restore(&self, name: &str) -> Result<(), SnapshotError> {
        let prefix = Self::prefix(name);
        let snapshot_paths = self.vfs.list(&Self::list_prefix(name)).await?;
        if snapshot_paths.is_empty() {
            return Err(SnapshotError::UnknownSnapshot(name.to_string()));
        }

        let live_paths = self.vfs.list("/").await?;
        for path in live_paths {
            if path.starts_with(SNAPSHOTS_PREFIX) {
                continue;
            }
            // A concurrent delete of the same path is not an error here.
            let _ = self.vfs.delete(&path).await;
        }

        for snap_path in snapshot_paths {
            if snap_path.ends_with(SEALED_MARKER) {
                continue;
            }
            let rel = match snap_path.strip_prefix(&prefix) {
                Some(r) if !r.is_empty() => r,
                _ => continue,
            };
            let content = self.vfs.read(&snap_path).await?;
            self.vfs.write(rel, content).await?;
        }
        Ok(())
    }

    /// Distinct snapshot names currently stored, lexically ordered.
    pub async fn list(&self) -> Result<Vec<String>, SnapshotError> {
        let root = format!("{SNAPSHOTS_PREFIX}/");
        let entries = self.vfs.list(&root).await?;
        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|p| p.strip_prefix(&root)?.split('/').next().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Path-by-path comparison of two snapshots.
    pub async fn diff(&self, a: &str, b: &str) -> Result<SnapshotDiff, SnapshotError> {
        let prefix_a = Self::prefix(a);
        let prefix_b = Self::prefix(b);
        let paths_a = self.vfs.list(&Self::list_prefix(a)).await?;
        let paths_b = self.vfs.list(&Self::list_prefix(b)).await?;
        if paths_a.is_empty() {
            return Err(SnapshotError::UnknownSnapshot(a.to_string()));
        }
        if paths_b.is_empty() {
            return Err(SnapshotError::UnknownSnapshot(b.to_string()));
        }

        let rel = |prefix: &str, full: &str| -> Option<String> {
            let r = full.strip_prefix(prefix)?;
            if r.is_empty() || r == format!("/{SEALED_MARKER}") {
                None
            } else {
                Some(r.to_string())
            }
        };

        let mut rel_a: Vec<String> = paths_a.iter().filter_map(|p| rel(&prefix_a, p)).collect();
        let mut rel_b: Vec<String> = paths_b.iter().filter_map(|p| rel(&prefix_b, p)).collect();
        rel_a.sort();
        rel_b.sort();

        let mut diff = SnapshotDiff::default();
        for path in &rel_b {
            if !rel_a.contains(path) {
                diff.added.push(path.clone());
            }
        }
        for path in &rel_a {
            if !rel_b.contains(path) {
                diff.removed.push(path.clone());
            }
        }
        for path in &rel_a {
            if rel_b.contains(path) {
                let content_a = self.vfs.read(&format!("{prefix_a}{path}")).await?;
                let content_b = self.vfs.read(&format!("{prefix_b}{path}")).await?;
                if content_a != content_b {
                    diff.changed.push(path.clone());
                }
            }
        }
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::InMemoryVfs;

    fn store() -> (SnapshotStore, Arc<dyn Vfs>) {
        let vfs: Arc<dyn Vfs> = Arc::new(InMemoryVfs::new("p1"));
        (SnapshotStore::new(Arc::clone(&vfs)), vfs)
    }

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let (store, vfs) = store();
        vfs.write("/core/x", b"1".to_vec()).await.unwrap();
        store.create("genesis").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["genesis".to_string()]);
    }

    #[tokio::test]
    async fn genesis_cannot_be_recreated() {
        let (store, _vfs) = store();
        store.create("genesis").await.unwrap();
        let err = store.create("genesis").await;
        assert!(matches!(err, Err(SnapshotError::GenesisImmutable(_))));
    }

    #[tokio::test]
    async fn snapshot_excludes_its_own_prefix() {
        let (store, vfs) = store();
        vfs.write("/a", b"1".to_vec()).await.unwrap();
        store.create("s1").await.unwrap();
        store.create("s2").await.unwrap();
        let names = store.list().await.unwrap();
        assert_eq!(names, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[tokio::test]
    async fn restore_replaces_live_tree() {
        let (store, vfs) = store();
        vfs.write("/a", b"before".to_vec()).await.unwrap();
        store.create("checkpoint").await.unwrap();
        vfs.write("/a", b"after".to_vec()).await.unwrap();
        vfs.write("/b", b"new".to_vec()).await.unwrap();

        store.restore("checkpoint").await.unwrap();

        assert_eq!(vfs.read("/a").await.unwrap(), b"before");
        assert!(vfs.read("/b").await.is_err());
    }

    #[tokio::test]
    async fn restore_unknown_snapshot_fails() {
        let (store, _vfs) = store();
        let err = store.restore("nope").await;
        assert!(matches!(err, Err(SnapshotError::UnknownSnapshot(_))));
    }

    #[tokio::test]
    async fn diff_reports_added_removed_changed() {
        let (store, vfs) = store();
        vfs.write("/keep", b"same".to_vec()).await.unwrap();
        vfs.write("/old", b"gone-soon".to_vec()).await.unwrap();
        vfs.write("/will-change", b"v1".to_vec()).await.unwrap();
        store.create("a").await.unwrap();

        vfs.delete("/old").await.unwrap();
        vfs.write("/will-change", b"v2".to_vec()).await.unwrap();
        vfs.write("/fresh", b"new".to_vec()).await.unwrap();
        store.create("b").await.unwrap();

        let diff = store.diff("a", "b").await.unwrap();
        assert_eq!(diff.added, vec!["/fresh".to_string()]);
        assert_eq!(diff.removed, vec!["/old".to_string()]);
        assert_eq!(diff.changed, vec!["/will-change".to_string()]);
    }
}
