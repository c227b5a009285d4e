//! VFS path parsing and normalization.
//!
//! A path is `/` followed by `/`-separated non-empty segments of printable
//! ASCII, with no `..` segment and no leading whitespace on any segment.
//! Paths are case-sensitive and are normalized (a single canonical `String`
//! form) before being used as a storage key.

use std::fmt;

use crate::error::VfsError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsPath(String);

impl VfsPath {
    /// Parse and normalize `raw` into a [`VfsPath`], rejecting malformed
    /// input.
    pub fn parse(raw: &str) -> Result<Self, VfsError> {
        if !raw.starts_with('/') {
            return Err(VfsError::PathInvalid(raw.to_string()));
        }
        let segments: Vec<&str> = raw.split('/').skip(1).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(VfsError::PathInvalid(raw.to_string()));
        }
        for segment in &segments {
            if *segment == ".." || *segment == "." {
                return Err(VfsError::PathInvalid(raw.to_string()));
            }
            if segment.starts_with(char::is_whitespace) {
                return Err(VfsError::PathInvalid(raw.to_string()));
            }
            if !segment.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
                return Err(VfsError::PathInvalid(raw.to_string()));
            }
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this path lies at or under `prefix` (e.g. `/core/x` is under
    /// `/core`).
    pub fn is_under(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        self.0 == prefix || self.0.starts_with(&format!("{prefix}/"))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').skip(1)
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for VfsPath {
    type Error = VfsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_paths() {
        assert!(VfsPath::parse("/core/agent-loop.js").is_ok());
        assert!(VfsPath::parse("/tools/Add").is_ok());
        assert!(VfsPath::parse("/.snapshots/genesis/core/x").is_ok());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(VfsPath::parse("no-leading-slash").is_err());
        assert!(VfsPath::parse("/").is_err());
        assert!(VfsPath::parse("/a//b").is_err());
        assert!(VfsPath::parse("/../etc/passwd").is_err());
        assert!(VfsPath::parse("/a/../b").is_err());
        assert!(VfsPath::parse("/ leading-space").is_err());
        assert!(VfsPath::parse("/a/\tb").is_err());
    }

    #[test]
    fn is_case_sensitive() {
        let a = VfsPath::parse("/Core/X").unwrap();
        let b = VfsPath::parse("/core/x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn is_under_matches_prefix_and_exact() {
        let p = VfsPath::parse("/core/agent.js").unwrap();
        assert!(p.is_under("/core"));
        assert!(p.is_under("/core/"));
        assert!(!p.is_under("/cores"));
        let root = VfsPath::parse("/core").unwrap();
        assert!(root.is_under("/core"));
    }
}
