//! The Agent Cycle Engine: the top-level FSM driving Think -> Act -> Observe
//! -> Reflect, grounded on `lifecycle/states.rs`'s tagged `ResourceState`
//! enum and `lifecycle/manager.rs` / `lifecycle/supervisor.rs`'s
//! breaker/recovery bookkeeping, specialized to the exact states and
//! transitions an agent cycle needs. Budgets are plain checked counters, the
//! same shape `security/policy.rs`'s `SlidingWindow` rate limiter uses.
//!
//! This module owns the state machine and its guarantees (legal transitions,
//! budget enforcement, cancellation, event ordering). Driving it with real
//! LLM calls, tool invocations, and context assembly is the composition
//! root's job: it calls `begin_think`/`think_done`/... in the right order
//! and stops as soon as a transition is refused.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CycleError;
use crate::event_bus::{Event, EventBus};

/// Budgets and breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct CycleBudgets {
    pub max_iterations: u32,
    pub max_session_tokens: u64,
    pub max_consecutive_failures: u32,
    pub wall_clock_ms: u64,
}

impl Default for CycleBudgets {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_session_tokens: u64::MAX,
            max_consecutive_failures: 5,
            wall_clock_ms: u64::MAX,
        }
    }
}

/// The cycle's current state, tagged the way `lifecycle::ResourceState` is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CycleState {
    Idle,
    Thinking,
    AwaitingApproval,
    Acting,
    Observing,
    Reflecting,
    Halted,
    Errored { reason: String },
}

pub struct CycleEngine {
    state: Mutex<CycleState>,
    budgets: CycleBudgets,
    cycle_count: AtomicU32,
    consecutive_failures: AtomicU32,
    tokens_used_session: AtomicU64,
    cancelled: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    bus: Arc<EventBus>,
}

impl CycleEngine {
    pub fn new(budgets: CycleBudgets, bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(CycleState::Idle),
            budgets,
            cycle_count: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            tokens_used_session: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            started_at: Mutex::new(None),
            bus,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state.lock().clone()
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn tokens_used_session(&self) -> u64 {
        self.tokens_used_session.load(Ordering::SeqCst)
    }

    /// Caller-initiated cancellation, observed at the next suspension point.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: CycleState) {
        *self.state.lock() = next;
    }

    fn require_state(&self, expected: &CycleState) -> Result<(), CycleError> {
        let current = self.state.lock().clone();
        if &current != expected {
            return Err(CycleError::BudgetExceeded(format!(
                "illegal transition: expected {current:?} to be {expected:?}"
            )));
        }
        Ok(())
    }

    fn check_breakers(&self) -> Result<(), CycleError> {
        if self.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        if self.cycle_count.load(Ordering::SeqCst) >= self.budgets.max_iterations {
            self.trip("max_iterations exceeded");
            return Err(CycleError::BreakerTripped("max_iterations exceeded".into()));
        }
        if self.tokens_used_session.load(Ordering::SeqCst) >= self.budgets.max_session_tokens {
            self.trip("max_session_tokens exceeded");
            return Err(CycleError::BreakerTripped("max_session_tokens exceeded".into()));
        }
        if self.consecutive_failures.load(Ordering::SeqCst) >= self.budgets.max_consecutive_failures {
            self.trip("consecutive_failures threshold reached");
            return Err(CycleError::BreakerTripped("consecutive_failures threshold reached".into()));
        }
        if let Some(started) = *self.started_at.lock() {
            if started.elapsed().as_millis() as u64 >= self.budgets.wall_clock_ms {
                self.trip("wall_clock_ms exceeded");
                return Err(CycleError::BreakerTripped("wall_clock_ms exceeded".into()));
            }
        }
        Ok(())
    }

    fn trip(&self, reason: &str) {
        self.set_state(CycleState::Halted);
        self.bus.emit(Event::new("cycle:breaker", serde_json::json!({ "reason": reason })));
        self.bus.emit(Event::new("cycle:halt", serde_json::json!({ "reason": reason })));
    }

    /// `idle -> thinking` on `run(goal)`. Re-entering from `halted` starts a
    /// fresh session (resets per-session counters, keeps budgets).
    pub fn run(&self, goal: &str) -> Result<(), CycleError> {
        let current = self.state.lock().clone();
        if !matches!(current, CycleState::Idle | CycleState::Halted) {
            return Err(CycleError::BudgetExceeded(format!("cannot run() from {current:?}")));
        }
        self.cancelled.store(false, Ordering::SeqCst);
        self.cycle_count.store(0, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.tokens_used_session.store(0, Ordering::SeqCst);
        *self.started_at.lock() = Some(Instant::now());
        self.begin_think(goal)
    }

    /// `observing -> thinking` (and the initial `idle/halted -> thinking`
    /// entry via `run`). Emits `cycle:think_begin`.
    pub fn begin_think(&self, goal: &str) -> Result<(), CycleError> {
        self.check_breakers()?;
        self.cycle_count.fetch_add(1, Ordering::SeqCst);
        self.set_state(CycleState::Thinking);
        self.bus.emit(Event::new("cycle:think_begin", serde_json::json!({ "goal": goal })));
        Ok(())
    }

    /// `thinking -> acting | reflecting`. Emits `cycle:think_end`.
    pub fn think_done(&self, tool_call: Option<&str>, tokens: u64) -> Result<(), CycleError> {
        self.require_state(&CycleState::Thinking)?;
        self.tokens_used_session.fetch_add(tokens, Ordering::SeqCst);
        self.bus.emit(Event::new("cycle:think_end", serde_json::json!({ "tool_call": tool_call })));
        match tool_call {
            Some(_) => self.set_state(CycleState::Acting),
            None => self.set_state(CycleState::Reflecting),
        }
        self.check_breakers()
    }

    /// `acting -> awaiting_approval` when verification requires it.
    pub fn require_approval(&self) -> Result<(), CycleError> {
        self.require_state(&CycleState::Acting)?;
        self.set_state(CycleState::AwaitingApproval);
        Ok(())
    }

    /// `awaiting_approval -> acting` on approval, `-> observing` (as a
    /// failure) on rejection.
    pub fn approval_decided(&self, approved: bool) -> Result<(), CycleError> {
        self.require_state(&CycleState::AwaitingApproval)?;
        if approved {
            self.set_state(CycleState::Acting);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
            self.set_state(CycleState::Observing);
        }
        Ok(())
    }

    /// `acting -> observing` on tool result.
    pub fn act_done(&self, success: bool) -> Result<(), CycleError> {
        self.require_state(&CycleState::Acting)?;
        if success {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        }
        self.set_state(CycleState::Observing);
        self.check_breakers()
    }

    /// `observing -> thinking` unless budgets are exhausted or cancel was
    /// requested (checked by `check_breakers`, which halts on trip).
    pub fn observe_done(&self, goal: &str) -> Result<(), CycleError> {
        self.require_state(&CycleState::Observing)?;
        self.begin_think(goal)
    }

    /// `reflecting -> thinking` if the goal is incomplete, `-> halted` if
    /// complete.
    pub fn reflect(&self, goal_complete: bool, goal: &str) -> Result<(), CycleError> {
        self.require_state(&CycleState::Reflecting)?;
        if goal_complete {
            self.set_state(CycleState::Halted);
            self.bus.emit(Event::new("cycle:halt", serde_json::json!({ "reason": "goal_complete" })));
            Ok(())
        } else {
            self.begin_think(goal)
        }
    }

    /// Any -> `errored` on uncaught failure, then `errored -> halted` after
    /// logging, a two-step terminal path.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.set_state(CycleState::Errored { reason: reason.clone() });
        self.bus.emit(Event::new("cycle:error", serde_json::json!({ "reason": reason })));
        self.set_state(CycleState::Halted);
        self.bus.emit(Event::new("cycle:halt", serde_json::json!({ "reason": "errored" })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    fn engine() -> CycleEngine {
        CycleEngine::new(CycleBudgets::default(), Arc::new(EventBus::new()))
    }

    #[test]
    fn run_moves_idle_to_thinking() {
        let engine = engine();
        engine.run("do the thing").unwrap();
        assert_eq!(engine.state(), CycleState::Thinking);
    }

    #[test]
    fn think_done_with_tool_call_moves_to_acting() {
        let engine = engine();
        engine.run("goal").unwrap();
        engine.think_done(Some("read_file"), 10).unwrap();
        assert_eq!(engine.state(), CycleState::Acting);
    }

    #[test]
    fn think_done_without_tool_call_moves_to_reflecting() {
        let engine = engine();
        engine.run("goal").unwrap();
        engine.think_done(None, 10).unwrap();
        assert_eq!(engine.state(), CycleState::Reflecting);
    }

    #[test]
    fn full_cycle_then_reflect_complete_halts() {
        let engine = engine();
        engine.run("goal").unwrap();
        engine.think_done(Some("tool"), 5).unwrap();
        engine.act_done(true).unwrap();
        engine.observe_done("goal").unwrap();
        engine.think_done(None, 5).unwrap();
        engine.reflect(true, "goal").unwrap();
        assert_eq!(engine.state(), CycleState::Halted);
    }

    #[test]
    fn reflect_incomplete_returns_to_thinking() {
        let engine = engine();
        engine.run("goal").unwrap();
        engine.think_done(None, 5).unwrap();
        engine.reflect(false, "goal").unwrap();
        assert_eq!(engine.state(), CycleState::Thinking);
    }

    #[test]
    fn rejection_routes_to_observing_as_failure() {
        let engine = engine();
        engine.run("goal").unwrap();
        engine.think_done(Some("tool"), 5).unwrap();
        engine.require_approval().unwrap();
        engine.approval_decided(false).unwrap();
        assert_eq!(engine.state(), CycleState::Observing);
        assert_eq!(engine.consecutive_failures(), 1);
    }

    #[test]
    fn consecutive_failures_trips_breaker() {
        let engine = engine();
        engine.run("goal").unwrap();
        for _ in 0..5 {
            engine.think_done(Some("tool"), 1).unwrap();
            let _ = engine.act_done(false);
        }
        assert_eq!(engine.state(), CycleState::Halted);
    }

    #[test]
    fn max_iterations_trips_breaker() {
        let budgets = CycleBudgets { max_iterations: 2, ..CycleBudgets::default() };
        let engine = CycleEngine::new(budgets, Arc::new(EventBus::new()));
        engine.run("goal").unwrap();
        engine.think_done(None, 1).unwrap();
        let result = engine.reflect(false, "goal");
        assert!(result.is_err());
        assert_eq!(engine.state(), CycleState::Halted);
    }

    #[test]
    fn cancel_is_observed_at_next_suspension_point() {
        let engine = engine();
        engine.run("goal").unwrap();
        engine.think_done(None, 1).unwrap();
        engine.cancel();
        let result = engine.reflect(false, "goal");
        assert!(matches!(result, Err(CycleError::Cancelled)));
    }

    #[test]
    fn fail_transitions_through_errored_to_halted() {
        let engine = engine();
        engine.run("goal").unwrap();
        engine.fail("llm transport died");
        assert_eq!(engine.state(), CycleState::Halted);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let engine = engine();
        let result = engine.act_done(true);
        assert!(result.is_err());
    }

    #[test]
    fn halted_session_can_be_re_entered_with_a_fresh_goal() {
        let engine = engine();
        engine.run("first goal").unwrap();
        engine.fail("boom");
        assert_eq!(engine.state(), CycleState::Halted);
        engine.run("second goal").unwrap();
        assert_eq!(engine.state(), CycleState::Thinking);
        assert_eq!(engine.cycle_count(), 1);
    }
}
