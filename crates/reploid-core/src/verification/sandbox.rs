//! Stage 2: sandbox trial.
//!
//! Grounded on `modules/container/sandbox.rs`'s `SandboxManager`: there it
//! isolates a shell command inside a container; here it isolates a proposed
//! change set inside a disposable VFS clone. The "smoke sequence" is a list
//! of [`SandboxRunner`]s executed in order against the clone.

use async_trait::async_trait;

use crate::vfs::Vfs;

/// One step of the smoke-test sequence run against the sandboxed clone
/// after a change set has been applied to it.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Inspect `vfs` (already mutated by the proposed change set) and
    /// return `Err(reason)` if the proposal should be rejected.
    async fn check(&self, vfs: &dyn Vfs, changed_paths: &[String]) -> Result<(), String>;
}

/// Confirms every non-deleted changed path still reads back successfully in
/// the clone ("module load"). Always included as the first smoke step.
pub struct ModuleLoadCheck;

#[async_trait]
impl SandboxRunner for ModuleLoadCheck {
    async fn check(&self, vfs: &dyn Vfs, changed_paths: &[String]) -> Result<(), String> {
        for path in changed_paths {
            if vfs.stat(path).await.is_err() {
                continue; // deleted by this change set; nothing to load
            }
            vfs.read(path).await.map_err(|e| format!("failed to load {path}: {e}"))?;
        }
        Ok(())
    }
}
