//! Stage 1: static screen.
//!
//! Grounded on `security/policy.rs`'s `SecurityPolicy::validate_command`
//! deny-list approach, applied here to proposed file contents instead of
//! shell commands.

use regex::Regex;

use crate::error::VerificationError;
use crate::vfs::ChangeSetEntry;

/// Patterns that disqualify a file's content outright, tagged with the rule
/// name surfaced in the rejection.
pub struct StaticScreen {
    deny_patterns: Vec<(String, Regex)>,
    byte_ceiling_per_file: u64,
}

impl StaticScreen {
    pub fn new(byte_ceiling_per_file: u64) -> Self {
        let deny_patterns = default_deny_patterns();
        Self {
            deny_patterns,
            byte_ceiling_per_file,
        }
    }

    pub fn with_patterns(byte_ceiling_per_file: u64, patterns: Vec<(String, Regex)>) -> Self {
        Self {
            deny_patterns: patterns,
            byte_ceiling_per_file,
        }
    }

    /// Run every configured check against each entry of `change_set`.
    /// `write_allowed` reports whether the caller's declared `write_vfs`
    /// capability covers a given path.
    pub fn screen(
        &self,
        change_set: &[ChangeSetEntry],
        write_allowed: impl Fn(&str) -> bool,
    ) -> Result<(), VerificationError> {
        for entry in change_set {
            let path = entry.path();
            if !write_allowed(path) {
                return Err(VerificationError::Static {
                    rule: "capability".into(),
                    path: path.to_string(),
                    reason: "path is outside the caller's granted write_vfs prefixes".into(),
                });
            }

            if let ChangeSetEntry::Write { bytes, .. } = entry {
                if bytes.len() as u64 > self.byte_ceiling_per_file {
                    return Err(VerificationError::Static {
                        rule: "size_ceiling".into(),
                        path: path.to_string(),
                        reason: format!("{} bytes exceeds ceiling of {}", bytes.len(), self.byte_ceiling_per_file),
                    });
                }

                let text = String::from_utf8_lossy(bytes);
                for (rule, pattern) in &self.deny_patterns {
                    if pattern.is_match(&text) {
                        return Err(VerificationError::Static {
                            rule: rule.clone(),
                            path: path.to_string(),
                            reason: format!("matched deny pattern `{}`", pattern.as_str()),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn default_deny_patterns() -> Vec<(String, Regex)> {
    let specs: &[(&str, &str)] = &[
        ("unsafe_eval", r"\beval\s*\("),
        ("host_escape", r"std::process::Command"),
        ("host_escape", r"\bexec\s*\("),
        ("unbounded_loop", r"while\s*\(\s*true\s*\)"),
        ("unbounded_loop", r"loop\s*\{\s*\}"),
    ];
    specs
        .iter()
        .map(|(rule, pattern)| ((*rule).to_string(), Regex::new(pattern).expect("static deny pattern is valid")))
        .collect()
}
