//! Arena Harness: dispatches N competitor proposals concurrently, verifies
//! each sequentially against a shared sandbox snapshot, and ranks them
//!. Grounded on `agents/orchestrator.rs`'s
//! `AgentOrchestrator::execute_all` (`JoinSet` + bounded concurrency via a
//! semaphore, per-task deadline, failure accounting), adapted from
//! subagent dispatch to change-set proposal competition. Arena never
//! mutates the live VFS; the caller applies the winner's change set
//! through the verification pipeline itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::event_bus::EventBus;
use crate::tools::Capability;
use crate::tools::write_path_allowed;
use crate::verification::VerificationPipeline;
use crate::vfs::{ChangeSetEntry, Vfs};

/// A single competitor's proposed response to an objective.
pub struct Proposal {
    pub change_set: Vec<ChangeSetEntry>,
    pub tokens: u64,
}

/// One distinct prompt/model/temperature configuration competing in an
/// arena round.
#[async_trait]
pub trait CompetitorAgent: Send + Sync {
    async fn propose(&self, objective: &str) -> Result<Proposal, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaStatus {
    Pass,
    Fail,
    Error,
}

/// Secondary ranking key among `PASS` results, configurable between
/// smallest wall_ms or smallest tokens. Decided here: defaults to
/// wall-clock since that is the cost every caller pays regardless of which
/// LLM provider is in use, whereas token accounting differs per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaRankBy {
    WallClock,
    Tokens,
}

pub struct ArenaResult {
    pub competitor: usize,
    pub status: ArenaStatus,
    pub tokens: u64,
    pub wall_ms: u64,
    pub warnings: Vec<String>,
    pub proposal_bytes: u64,
    pub change_set: Option<Vec<ChangeSetEntry>>,
}

pub struct ArenaOutcome {
    pub ranked_results: Vec<ArenaResult>,
    pub winner: Option<usize>,
}

pub struct ArenaHarness {
    bus: Arc<EventBus>,
    byte_ceiling_per_file: u64,
    max_concurrency: usize,
}

impl ArenaHarness {
    pub fn new(bus: Arc<EventBus>, byte_ceiling_per_file: u64, max_concurrency: usize) -> Self {
        Self {
            bus,
            byte_ceiling_per_file,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run one arena round. `base` is cloned once into a sandbox snapshot
    /// `S`; each proposal is verified (static screen + sandbox trial only,
    /// never the core-path gate) against a fresh clone of `S`, so proposals
    /// never see each other's writes.
    pub async fn run(
        &self,
        base: &dyn Vfs,
        objective: &str,
        competitors: Vec<Arc<dyn CompetitorAgent>>,
        competitor_deadline: Duration,
        granted: Vec<Capability>,
        rank_by: ArenaRankBy,
    ) -> ArenaOutcome {
        let snapshot: Arc<dyn Vfs> = Arc::from(base.clone_vfs());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();

        for (index, competitor) in competitors.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore);
            let objective = objective.to_string();
            let deadline = competitor_deadline;
            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let started = Instant::now();
                let outcome = tokio::time::timeout(deadline, competitor.propose(&objective)).await;
                (index, started.elapsed(), outcome)
            });
        }

        let mut proposals = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, elapsed, Ok(Ok(proposal)))) => proposals.push((index, elapsed, Ok(proposal))),
                Ok((index, elapsed, Ok(Err(reason)))) => proposals.push((index, elapsed, Err(reason))),
                Ok((index, elapsed, Err(_timeout))) => {
                    proposals.push((index, elapsed, Err("competitor timed out".to_string())))
                }
                Err(join_error) => {
                    self.bus.emit(crate::event_bus::Event::new(
                        "arena:task_panicked",
                        serde_json::json!({ "reason": join_error.to_string() }),
                    ));
                }
            }
        }
        proposals.sort_by_key(|(index, ..)| *index);

        let mut results = Vec::with_capacity(proposals.len());
        for (index, elapsed, proposal) in proposals {
            let wall_ms = elapsed.as_millis() as u64;
            let result = match proposal {
                Err(reason) => ArenaResult {
                    competitor: index,
                    status: ArenaStatus::Error,
                    tokens: 0,
                    wall_ms,
                    warnings: vec![reason],
                    proposal_bytes: 0,
                    change_set: None,
                },
                Ok(proposal) => {
                    let sandbox: Arc<dyn Vfs> = Arc::from(snapshot.clone_vfs());
                    let pipeline =
                        VerificationPipeline::new(Arc::clone(&sandbox), Arc::clone(&self.bus), self.byte_ceiling_per_file);
                    let granted = granted.clone();
                    let proposal_bytes: u64 = proposal
                        .change_set
                        .iter()
                        .map(|c| match c {
                            ChangeSetEntry::Write { bytes, .. } => bytes.len() as u64,
                            ChangeSetEntry::Delete { .. } => 0,
                        })
                        .sum();
                    match pipeline
                        .verify_without_gate(&proposal.change_set, |p| write_path_allowed(&granted, p))
                        .await
                    {
                        Ok(()) => ArenaResult {
                            competitor: index,
                            status: ArenaStatus::Pass,
                            tokens: proposal.tokens,
                            wall_ms,
                            warnings: Vec::new(),
                            proposal_bytes,
                            change_set: Some(proposal.change_set),
                        },
                        Err(e) => ArenaResult {
                            competitor: index,
                            status: ArenaStatus::Fail,
                            tokens: proposal.tokens,
                            wall_ms,
                            warnings: vec![e.to_string()],
                            proposal_bytes,
                            change_set: None,
                        },
                    }
                }
            };
            results.push(result);
        }

        results.sort_by(|a, b| {
            let rank = |r: &ArenaResult| match r.status {
                ArenaStatus::Pass => 0,
                ArenaStatus::Fail => 1,
                ArenaStatus::Error => 2,
            };
            rank(a).cmp(&rank(b)).then_with(|| match rank_by {
                ArenaRankBy::WallClock => a.wall_ms.cmp(&b.wall_ms),
                ArenaRankBy::Tokens => a.tokens.cmp(&b.tokens),
            })
        });

        let winner = results.first().filter(|r| r.status == ArenaStatus::Pass).map(|r| r.competitor);
        ArenaOutcome {
            ranked_results: results,
            winner,
        }
    }
}
