//! The fixed capability vocabulary tools are scoped to.
//!
//! Mirrors the permission-token pattern in `security/policy.rs` (command
//! allow-lists keyed by a small fixed enum), generalized to the five
//! capability classes a REPLOID tool may declare.

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    ReadVfs,
    WriteVfs(BTreeSet<String>),
    SpawnWorker,
    NetworkFetch(BTreeSet<String>),
    InvokeTool,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::ReadVfs => write!(f, "read_vfs"),
            Capability::WriteVfs(prefixes) => {
                write!(f, "write_vfs({})", prefixes.iter().cloned().collect::<Vec<_>>().join(","))
            }
            Capability::SpawnWorker => write!(f, "spawn_worker"),
            Capability::NetworkFetch(hosts) => {
                write!(f, "network_fetch({})", hosts.iter().cloned().collect::<Vec<_>>().join(","))
            }
            Capability::InvokeTool => write!(f, "invoke_tool"),
        }
    }
}

/// True if `granted` covers `required`. `WriteVfs`/`NetworkFetch` are
/// satisfied when every element the caller needs is present in the grant's
/// own set; other variants are all-or-nothing.
pub fn satisfies(granted: &[Capability], required: &Capability) -> bool {
    granted.iter().any(|g| match (g, required) {
        (Capability::ReadVfs, Capability::ReadVfs) => true,
        (Capability::SpawnWorker, Capability::SpawnWorker) => true,
        (Capability::InvokeTool, Capability::InvokeTool) => true,
        (Capability::WriteVfs(have), Capability::WriteVfs(want)) => want.is_subset(have),
        (Capability::NetworkFetch(have), Capability::NetworkFetch(want)) => want.is_subset(have),
        _ => false,
    })
}

/// True if `prefix` falls under at least one of the write prefixes granted.
pub fn write_path_allowed(granted: &[Capability], path: &str) -> bool {
    granted.iter().any(|g| match g {
        Capability::WriteVfs(prefixes) => prefixes.iter().any(|p| {
            let p = p.trim_end_matches('/');
            path == p || path.starts_with(&format!("{p}/"))
        }),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_vfs_is_satisfied_by_superset_prefixes() {
        let granted = vec![Capability::WriteVfs(BTreeSet::from(["/tools".into(), "/memory".into()]))];
        let required = Capability::WriteVfs(BTreeSet::from(["/tools".into()]));
        assert!(satisfies(&granted, &required));
    }

    #[test]
    fn write_vfs_rejects_missing_prefix() {
        let granted = vec![Capability::WriteVfs(BTreeSet::from(["/tools".into()]))];
        let required = Capability::WriteVfs(BTreeSet::from(["/core".into()]));
        assert!(!satisfies(&granted, &required));
    }

    #[test]
    fn write_path_allowed_matches_subpaths() {
        let granted = vec![Capability::WriteVfs(BTreeSet::from(["/tools".into()]))];
        assert!(write_path_allowed(&granted, "/tools/Add"));
        assert!(!write_path_allowed(&granted, "/core/x"));
    }
}
