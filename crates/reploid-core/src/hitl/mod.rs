//! Human-in-the-loop approval queue.
//!
//! Grounded on `commands/approval.rs` plus the wait/notify shape
//! `event_bus/traits.rs` uses for `ApprovalNeeded`/`ApprovalResponse`:
//! there a Tauri command blocks on a channel until the frontend answers;
//! here `submit` blocks the calling cycle on a `tokio::sync::Notify` until
//! `decide` is called or the request expires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::HitlMode;
use crate::error::HitlError;
use crate::event_bus::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalKind {
    CoreWrite,
    ToolCreation,
    OutOfSandbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub kind: ApprovalKind,
    pub payload_ref: String,
    pub requested_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

struct Pending {
    request: ApprovalRequest,
    notify: Arc<Notify>,
}

pub struct HitlController {
    mode: Mutex<HitlMode>,
    every_n: usize,
    seen_since_approval: AtomicUsize,
    requests: Mutex<HashMap<String, Pending>>,
    next_id: AtomicU64,
    expiry: Duration,
    bus: Arc<EventBus>,
}

impl HitlController {
    pub fn new(mode: HitlMode, every_n: usize, expiry: Duration, bus: Arc<EventBus>) -> Self {
        Self {
            mode: Mutex::new(mode),
            every_n: every_n.max(1),
            seen_since_approval: AtomicUsize::new(0),
            requests: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            expiry,
            bus,
        }
    }

    pub fn set_mode(&self, mode: HitlMode) {
        *self.mode.lock() = mode;
    }

    /// Whether the next submission actually requires a human decision,
    /// per the configured mode.
    fn requires_decision(&self) -> bool {
        match *self.mode.lock() {
            HitlMode::Off => false,
            HitlMode::Hitl => true,
            HitlMode::EveryN => {
                let count = self.seen_since_approval.fetch_add(1, Ordering::SeqCst) + 1;
                count % self.every_n == 0
            }
        }
    }

    /// Submit a request and block until it is decided or expires. In `OFF`
    /// mode (or an `EVERY_N` miss), auto-approves immediately.
    pub async fn submit(&self, kind: ApprovalKind, payload_ref: String) -> Result<(), HitlError> {
        if !self.requires_decision() {
            return Ok(());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let notify = Arc::new(Notify::new());
        let request = ApprovalRequest {
            id: id.clone(),
            kind,
            payload_ref,
            requested_at: Utc::now(),
            status: ApprovalStatus::Pending,
            decided_at: None,
            note: None,
        };
        self.requests.lock().insert(
            id.clone(),
            Pending {
                request: request.clone(),
                notify: Arc::clone(&notify),
            },
        );
        self.bus.emit(Event::new("approval:pending", serde_json::json!(request)));

        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(self.expiry) => {
                let mut requests = self.requests.lock();
                if let Some(pending) = requests.get_mut(&id) {
                    pending.request.status = ApprovalStatus::Expired;
                    pending.request.decided_at = Some(Utc::now());
                }
            }
        }

        let status = {
            let requests = self.requests.lock();
            requests.get(&id).map(|p| p.request.status).unwrap_or(ApprovalStatus::Expired)
        };
        self.requests.lock().remove(&id);

        match status {
            ApprovalStatus::Approved => Ok(()),
            ApprovalStatus::Expired => Err(HitlError::Expired(id)),
            _ => Err(HitlError::Rejected(id)),
        }
    }

    pub fn decide(&self, approval_id: &str, approved: bool, note: Option<String>) -> Result<(), HitlError> {
        let mut requests = self.requests.lock();
        let pending = requests
            .get_mut(approval_id)
            .ok_or_else(|| HitlError::UnknownApproval(approval_id.to_string()))?;
        pending.request.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        pending.request.decided_at = Some(Utc::now());
        pending.request.note = note;
        let decided = pending.request.clone();
        pending.notify.notify_one();
        drop(requests);
        self.bus.emit(Event::new("approval:decided", serde_json::json!(decided)));
        Ok(())
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .requests
            .lock()
            .values()
            .map(|p| p.request.clone())
            .filter(|r| r.status == ApprovalStatus::Pending)
            .collect();
        requests.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(mode: HitlMode) -> Arc<HitlController> {
        Arc::new(HitlController::new(mode, 1, Duration::from_millis(100), Arc::new(EventBus::new())))
    }

    #[tokio::test]
    async fn off_mode_auto_approves() {
        let hitl = controller(HitlMode::Off);
        hitl.submit(ApprovalKind::CoreWrite, "/core/x".into()).await.unwrap();
    }

    #[tokio::test]
    async fn hitl_mode_blocks_until_decided() {
        let hitl = controller(HitlMode::Hitl);
        let h = Arc::clone(&hitl);
        let task = tokio::spawn(async move { h.submit(ApprovalKind::CoreWrite, "/core/x".into()).await });

        // Give the submit task a chance to register its pending request.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = hitl.pending();
        assert_eq!(pending.len(), 1);
        hitl.decide(&pending[0].id, true, None).unwrap();

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn rejection_is_an_error() {
        let hitl = controller(HitlMode::Hitl);
        let h = Arc::clone(&hitl);
        let task = tokio::spawn(async move { h.submit(ApprovalKind::CoreWrite, "/core/x".into()).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = hitl.pending();
        hitl.decide(&pending[0].id, false, Some("no".into())).unwrap();

        assert!(matches!(task.await.unwrap(), Err(HitlError::Rejected(_))));
    }

    #[tokio::test]
    async fn expiry_without_decision_is_rejection() {
        let hitl = controller(HitlMode::Hitl);
        let result = hitl.submit(ApprovalKind::CoreWrite, "/core/x".into()).await;
        assert!(matches!(result, Err(HitlError::Expired(_))));
    }

    #[tokio::test]
    async fn every_n_only_requires_decision_on_the_nth_call() {
        let hitl = controller(HitlMode::EveryN);
        // every_n defaults to 1 here, so every call requires a decision;
        // use a controller configured with n=2 to exercise the skip path.
        let hitl = Arc::new(HitlController::new(HitlMode::EveryN, 2, Duration::from_millis(50), Arc::new(EventBus::new())));
        hitl.submit(ApprovalKind::ToolCreation, "/tools/Add".into()).await.unwrap();

        let h = Arc::clone(&hitl);
        let task = tokio::spawn(async move { h.submit(ApprovalKind::ToolCreation, "/tools/Sub".into()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = hitl.pending();
        assert_eq!(pending.len(), 1);
        hitl.decide(&pending[0].id, true, None).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
