//! The three-stage verification pipeline a proposed change set must pass
//! before it can be applied to the live VFS.

mod sandbox;
mod static_screen;

pub use sandbox::{ModuleLoadCheck, SandboxRunner};
pub use static_screen::StaticScreen;

use std::sync::Arc;

use crate::error::VerificationError;
use crate::event_bus::{Event, EventBus};
use crate::vfs::{ChangeSetEntry, Vfs};

/// Paths under these prefixes require arena consensus or human approval
/// before their change set may be committed.
pub const CORE_PREFIXES: &[&str] = &["/core", "/infrastructure", "/core/tool_runner"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Passed static screen and sandbox trial; no core paths touched.
    Pass,
    /// Passed static screen and sandbox trial, but touches core paths and
    /// needs arena consensus or human approval before it may be committed.
    Gated { core_paths: Vec<String> },
}

pub fn is_core_path(path: &str) -> bool {
    CORE_PREFIXES.iter().any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

pub struct VerificationPipeline {
    vfs: Arc<dyn Vfs>,
    bus: Arc<EventBus>,
    static_screen: StaticScreen,
    smoke_sequence: Vec<Arc<dyn SandboxRunner>>,
}

impl VerificationPipeline {
    pub fn new(vfs: Arc<dyn Vfs>, bus: Arc<EventBus>, byte_ceiling_per_file: u64) -> Self {
        Self {
            vfs,
            bus,
            static_screen: StaticScreen::new(byte_ceiling_per_file),
            smoke_sequence: vec![Arc::new(ModuleLoadCheck)],
        }
    }

    pub fn with_smoke_sequence(mut self, sequence: Vec<Arc<dyn SandboxRunner>>) -> Self {
        self.smoke_sequence = sequence;
        self
    }

    /// Run stages 1–2 against `change_set`. Does not mutate the live VFS.
    /// Emits `verification:fail` on rejection.
    pub async fn verify(
        &self,
        change_set: &[ChangeSetEntry],
        write_allowed: impl Fn(&str) -> bool,
    ) -> Result<VerificationOutcome, VerificationError> {
        if let Err(e) = self.static_screen.screen(change_set, write_allowed) {
            self.emit_fail("static", &e);
            return Err(e);
        }

        let sandbox = self.vfs.clone_vfs();
        let changed_paths: Vec<String> = change_set.iter().map(|c| c.path().to_string()).collect();
        if let Err(e) = sandbox.apply_batch(change_set.to_vec()).await {
            let err = VerificationError::Sandbox(format!("failed to apply change set to sandbox: {e}"));
            self.emit_fail("sandbox", &err);
            return Err(err);
        }
        for step in &self.smoke_sequence {
            if let Err(reason) = step.check(sandbox.as_ref(), &changed_paths).await {
                let err = VerificationError::Sandbox(reason);
                self.emit_fail("sandbox", &err);
                return Err(err);
            }
        }

        let core_paths: Vec<String> = changed_paths.into_iter().filter(|p| is_core_path(p)).collect();
        if core_paths.is_empty() {
            Ok(VerificationOutcome::Pass)
        } else {
            self.bus.emit(Event::new(
                "approval:required",
                serde_json::json!({ "core_paths": core_paths }),
            ));
            Ok(VerificationOutcome::Gated { core_paths })
        }
    }

    /// Run stages 1–2 only, skipping core-path classification and gating.
    /// Used by the arena harness, which sandboxes proposals against its own
    /// snapshot and never commits or escalates to approval itself.
    pub async fn verify_without_gate(
        &self,
        change_set: &[ChangeSetEntry],
        write_allowed: impl Fn(&str) -> bool,
    ) -> Result<(), VerificationError> {
        if let Err(e) = self.static_screen.screen(change_set, write_allowed) {
            self.emit_fail("static", &e);
            return Err(e);
        }

        let sandbox = self.vfs.clone_vfs();
        let changed_paths: Vec<String> = change_set.iter().map(|c| c.path().to_string()).collect();
        if let Err(e) = sandbox.apply_batch(change_set.to_vec()).await {
            let err = VerificationError::Sandbox(format!("failed to apply change set to sandbox: {e}"));
            self.emit_fail("sandbox", &err);
            return Err(err);
        }
        for step in &self.smoke_sequence {
            if let Err(reason) = step.check(sandbox.as_ref(), &changed_paths).await {
                let err = VerificationError::Sandbox(reason);
                self.emit_fail("sandbox", &err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Apply `change_set` to the live VFS as a single atomic batch and emit
    /// `verification:pass`. Callers must only reach this after `verify`
    /// returned `Pass`, or after a `Gated` outcome has cleared arena/HITL.
    pub async fn commit(&self, change_set: Vec<ChangeSetEntry>) -> Result<(), VerificationError> {
        self.vfs
            .apply_batch(change_set)
            .await
            .map_err(|e| VerificationError::Sandbox(format!("commit failed: {e}")))?;
        self.bus.emit(Event::new("verification:pass", serde_json::json!({})));
        Ok(())
    }

    fn emit_fail(&self, stage: &str, error: &VerificationError) {
        self.bus.emit(Event::new(
            "verification:fail",
            serde_json::json!({ "stage": stage, "reason": error.to_string() }),
        ));
    }
}
