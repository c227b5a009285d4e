//! The composition root: builds one wired-together [`Kernel`] by handing
//! out explicit `Arc` references, rather than managing state through a
//! Tauri-managed plugin registry. A dynamically-injected module registry
//! gets replaced with exactly this shape: an explicit builder, no ambient
//! globals, so a CLI, a test harness, and a long-running daemon can all
//! construct the same kernel from the same config.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arena::{ArenaHarness, ArenaRankBy};
use crate::audit::{AuditBundle, AuditEvent, AuditLog};
use crate::config::{ArenaRankBy as ConfigArenaRankBy, ReploidConfig};
use crate::context::{approximate_token_estimator, ContextWindow};
use crate::cycle::{CycleBudgets, CycleEngine, CycleState};
use crate::error::ReploidError;
use crate::event_bus::EventBus;
use crate::hitl::{ApprovalKind, HitlController};
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, Message, Role, ToolCallRequest};
use crate::memory::{EmbeddingProvider, EpisodicMemory, MemoryTiers, MockEmbeddingProvider, SemanticMemory, WorkingMemory};
use crate::snapshot::SnapshotStore;
use crate::swarm::{SwarmSync, SwarmTransport};
use crate::tools::{render_tool_catalog, write_path_allowed, Capability, ToolRegistry, ToolRunner};
use crate::verification::{VerificationOutcome, VerificationPipeline};
use crate::vfs::{ChangeSetEntry, ExportBundle, FileEntry, InMemoryVfs, Vfs};

const CURRENT_MAJOR: u32 = 1;
const DEFAULT_TOOL_BUDGET: Duration = Duration::from_secs(30);
/// Working memory is in-RAM and bounded by count rather than VFS quota, so
/// its capacity is a kernel constant rather than a config knob.
const WORKING_MEMORY_CAPACITY: usize = 50;
/// Records folded into the assembled prompt per cycle turn.
const MEMORY_RECALL_K: usize = 5;

/// Export/import bundle format: a whole run as one versioned document,
/// combining the VFS's file contents, the audit log's replay
/// events, and the cycle engine's terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBundleVersion {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub total_cycles: u32,
    pub file_count: usize,
    pub event_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBundle {
    pub version: RunBundleVersion,
    pub exported_at: DateTime<Utc>,
    pub manifest: RunManifest,
    pub state: CycleState,
    pub events: Vec<AuditEvent>,
    pub files: BTreeMap<String, String>,
}

/// What a driver (the CLI, a test harness) needs to pick an exit code: the
/// FSM's terminal state alone can't distinguish "breaker tripped the halt"
/// from "goal complete", nor does it record whether a human rejected a
/// core-path change along the way.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: CycleState,
    pub breaker_tripped: bool,
    pub approval_rejected: bool,
}

/// A tool result carrying this shape under a `change_set` key is routed
/// through the verification pipeline before the cycle is told the act
/// succeeded; anything else is treated as an ordinary tool result.
#[derive(Deserialize)]
struct ChangeSetEntryDto {
    op: String,
    path: String,
    #[serde(default)]
    content_b64: Option<String>,
}

fn parse_change_set(result: &Value) -> Option<Vec<ChangeSetEntry>> {
    let entries = result.get("change_set")?.as_array()?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let dto: ChangeSetEntryDto = serde_json::from_value(entry.clone()).ok()?;
        match dto.op.as_str() {
            "write" => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(dto.content_b64.unwrap_or_default())
                    .ok()?;
                out.push(ChangeSetEntry::Write { path: dto.path, bytes });
            }
            "delete" => out.push(ChangeSetEntry::Delete { path: dto.path }),
            _ => return None,
        }
    }
    Some(out)
}

/// Everything one running agent needs, wired once at startup.
pub struct Kernel {
    pub bus: Arc<EventBus>,
    pub vfs: Arc<InMemoryVfs>,
    pub tools: Arc<ToolRegistry>,
    pub tool_runner: Arc<ToolRunner>,
    pub verification: VerificationPipeline,
    pub hitl: Arc<HitlController>,
    pub cycle: Arc<CycleEngine>,
    pub snapshots: SnapshotStore,
    pub audit: Arc<AuditLog>,
    pub arena: ArenaHarness,
    pub llm: Arc<dyn LlmClient>,
    pub granted: Vec<Capability>,
    pub working_memory: Arc<WorkingMemory>,
    pub episodic_memory: Arc<EpisodicMemory>,
    pub semantic_memory: Arc<SemanticMemory>,
    pub memory: Arc<MemoryTiers>,
    context_budget: u64,
    rank_by: ArenaRankBy,
}

impl Kernel {
    pub fn new(
        config: &ReploidConfig,
        llm: Arc<dyn LlmClient>,
        peer_id: impl Into<String>,
        granted: Vec<Capability>,
    ) -> Result<Arc<Self>, ReploidError> {
        let bus = Arc::new(EventBus::new());
        let vfs = Arc::new(InMemoryVfs::with_limits(
            peer_id,
            config.vfs.file_read_ceiling_bytes,
            config.vfs.total_quota_bytes,
        ));
        let vfs_dyn: Arc<dyn Vfs> = vfs.clone() as Arc<dyn Vfs>;
        let tools = Arc::new(ToolRegistry::new());
        tools
            .register(
                crate::tools::ToolDefinition {
                    id: "network_fetch".to_string(),
                    description: "fetch a URL over HTTP, subject to the caller's network capability allow-list".to_string(),
                    input_schema: serde_json::json!({
                        "type": "object",
                        "required": ["url"],
                        "properties": { "url": { "type": "string" } },
                    }),
                    capabilities: vec![Capability::NetworkFetch(Default::default())],
                    body_ref: "/tools/network_fetch".to_string(),
                },
                Arc::new(crate::tools::NetworkFetchTool::new()),
            )
            .map_err(ReploidError::Tool)?;
        let tool_runner = ToolRunner::new(
            Arc::clone(&tools),
            Arc::clone(&bus),
            Arc::clone(&vfs_dyn),
            Duration::from_millis(config.tools.tool_timeout_ms),
            config.tools.output_ceiling_bytes,
        );
        let verification = VerificationPipeline::new(Arc::clone(&vfs_dyn), Arc::clone(&bus), config.vfs.file_read_ceiling_bytes);
        let hitl = Arc::new(HitlController::new(
            config.hitl.mode,
            config.hitl.n as usize,
            Duration::from_secs(config.hitl.timeout_minutes * 60),
            Arc::clone(&bus),
        ));
        let budgets = CycleBudgets {
            max_iterations: config.budgets.max_iterations,
            max_session_tokens: config.budgets.max_session_tokens,
            max_consecutive_failures: config.budgets.consecutive_failure_limit,
            wall_clock_ms: if config.budgets.wall_clock_ms == 0 { u64::MAX } else { config.budgets.wall_clock_ms },
        };
        let cycle = Arc::new(CycleEngine::new(budgets, Arc::clone(&bus)));
        let snapshots = SnapshotStore::new(Arc::clone(&vfs_dyn));
        let vfs_for_clock = Arc::clone(&vfs);
        let audit = AuditLog::new(move || vfs_for_clock.current_clock());
        audit.install(&bus);
        let arena = ArenaHarness::new(Arc::clone(&bus), config.vfs.file_read_ceiling_bytes, 4);
        let rank_by = match config.arena.rank_by {
            ConfigArenaRankBy::WallClock => ArenaRankBy::WallClock,
            ConfigArenaRankBy::Tokens => ArenaRankBy::Tokens,
        };

        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
        let working_memory = Arc::new(WorkingMemory::new(WORKING_MEMORY_CAPACITY, Arc::clone(&embeddings)));
        let episodic_memory = Arc::new(EpisodicMemory::new(Arc::clone(&vfs_dyn), Arc::clone(&embeddings)));
        let semantic_memory = Arc::new(SemanticMemory::new(Arc::clone(&vfs_dyn), embeddings));
        let memory = Arc::new(MemoryTiers::new(
            Arc::clone(&working_memory),
            Arc::clone(&episodic_memory),
            Arc::clone(&semantic_memory),
        ));

        Ok(Arc::new(Self {
            bus,
            vfs,
            tools,
            tool_runner,
            verification,
            hitl,
            cycle,
            snapshots,
            audit,
            arena,
            llm,
            granted,
            working_memory,
            episodic_memory,
            semantic_memory,
            memory,
            context_budget: config.budgets.context_budget,
            rank_by,
        }))
    }

    pub fn rank_by(&self) -> ArenaRankBy {
        self.rank_by
    }

    /// Wire a swarm sync peer onto this kernel's VFS. Left as an explicit
    /// opt-in call (rather than built into `new`) since the transport
    /// (loopback for tests, WebSocket for a real peer) is the caller's
    /// choice, made after the kernel already exists.
    pub fn enable_swarm(&self, transport: Arc<dyn SwarmTransport>) -> Arc<SwarmSync> {
        let sync = SwarmSync::new(Arc::clone(&self.vfs), transport);
        sync.install();
        sync
    }

    /// Drive one full Think -> Act -> Observe -> Reflect session to
    /// completion, returning the terminal state. A tool result carrying a
    /// `change_set` field is routed through the verification pipeline
    /// (and, if it touches a core path, the HITL queue) before the cycle
    /// is told the act succeeded.
    pub async fn run_goal(self: &Arc<Self>, goal: &str) -> Result<RunOutcome, ReploidError> {
        let breaker_tripped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&breaker_tripped);
        let breaker_sub = self.bus.on("cycle:breaker", move |_| {
            flag.store(true, Ordering::SeqCst);
        });

        let result = self.run_goal_inner(goal).await;
        self.bus.off(breaker_sub);

        let (state, approval_rejected) = result?;
        Ok(RunOutcome {
            state,
            breaker_tripped: breaker_tripped.load(Ordering::SeqCst),
            approval_rejected,
        })
    }

    async fn run_goal_inner(self: &Arc<Self>, goal: &str) -> Result<(CycleState, bool), ReploidError> {
        self.cycle.run(goal).map_err(ReploidError::Cycle)?;

        let catalog = render_tool_catalog(&self.tools.list());
        let mut context = ContextWindow::new(self.context_budget, approximate_token_estimator());
        context.append(Message::new(Role::User, goal.to_string()), self.llm.as_ref()).await;
        self.working_memory.remember(goal.to_string()).await?;

        let mut pending_call: Option<ToolCallRequest> = None;
        let mut approval_rejected = false;

        loop {
            match self.cycle.state() {
                CycleState::Thinking => {
                    let prompt_hints = context.messages().last().map(|m| m.content.as_str()).unwrap_or(goal);
                    let messages = context.assemble(prompt_hints, self.memory.as_ref(), MEMORY_RECALL_K).await;
                    let request = CompletionRequest {
                        messages,
                        temperature: 0.2,
                        tool_catalog: Some(catalog.clone()),
                    };
                    let response = match self.llm.complete(request).await {
                        Ok(r) => r,
                        Err(e) => {
                            self.cycle.fail(e.to_string());
                            return Ok((self.cycle.state(), approval_rejected));
                        }
                    };
                    let tokens_used = context.total_tokens();
                    match response {
                        CompletionResponse::Text(text) => {
                            context.append(Message::new(Role::Assistant, text), self.llm.as_ref()).await;
                            self.cycle.think_done(None, tokens_used).map_err(ReploidError::Cycle)?;
                        }
                        CompletionResponse::ToolCall(call) => {
                            context
                                .append(Message::new(Role::Assistant, format!("calling {}", call.name)), self.llm.as_ref())
                                .await;
                            self.cycle.think_done(Some(&call.name), tokens_used).map_err(ReploidError::Cycle)?;
                            pending_call = Some(call);
                        }
                    }
                }
                CycleState::Acting => {
                    let call = pending_call.take().ok_or_else(|| {
                        ReploidError::Config("acting without a pending tool call".to_string())
                    })?;
                    if self.act(&call, &mut context).await? {
                        approval_rejected = true;
                    }
                }
                terminal @ (CycleState::Halted | CycleState::Errored { .. }) => {
                    return Ok((terminal, approval_rejected));
                }
                // `AwaitingApproval` is entered and resolved synchronously
                // within `act`, so the loop never observes it directly.
                CycleState::AwaitingApproval => unreachable!("resolved inline within act()"),
                CycleState::Observing => {
                    self.cycle.observe_done(goal).map_err(ReploidError::Cycle)?;
                }
                // The LLM responding without a tool call is this harness's
                // signal that the goal is complete; a richer completion
                // check belongs to a future reflection tool, not here.
                CycleState::Reflecting => {
                    self.cycle.reflect(true, goal).map_err(ReploidError::Cycle)?;
                }
                CycleState::Idle => unreachable!("run() always leaves idle before this loop starts"),
            }
        }
    }

    /// Runs one tool call through to the cycle's `act_done`. Returns whether
    /// a gated core-path change was rejected by the HITL controller this
    /// call, the signal `run_goal` needs to pick a CLI exit code.
    async fn act(self: &Arc<Self>, call: &ToolCallRequest, context: &mut ContextWindow) -> Result<bool, ReploidError> {
        let invocation = self
            .tool_runner
            .invoke(&call.name, call.arguments.clone(), self.granted.clone(), DEFAULT_TOOL_BUDGET)
            .await;

        let value = match invocation {
            Ok(value) => value,
            Err(e) => {
                context.append(Message::new(Role::ToolResult, e.to_string()), self.llm.as_ref()).await;
                self.cycle.act_done(false).map_err(ReploidError::Cycle)?;
                return Ok(false);
            }
        };

        let Some(change_set) = parse_change_set(&value) else {
            context.append(Message::new(Role::ToolResult, value.to_string()), self.llm.as_ref()).await;
            self.episodic_memory.append(value.to_string()).await?;
            self.cycle.act_done(true).map_err(ReploidError::Cycle)?;
            return Ok(false);
        };

        let granted = self.granted.clone();
        let outcome = self.verification.verify(&change_set, |p| write_path_allowed(&granted, p)).await;
        match outcome {
            Ok(VerificationOutcome::Pass) => {
                self.verification.commit(change_set).await.map_err(ReploidError::Verification)?;
                context
                    .append(Message::new(Role::ToolResult, "change set committed".to_string()), self.llm.as_ref())
                    .await;
                self.episodic_memory.append(format!("committed change set for tool call {}", call.name)).await?;
                self.cycle.act_done(true).map_err(ReploidError::Cycle)?;
                Ok(false)
            }
            Ok(VerificationOutcome::Gated { core_paths }) => {
                self.cycle.require_approval().map_err(ReploidError::Cycle)?;
                let decision = self.hitl.submit(ApprovalKind::CoreWrite, core_paths.join(",")).await;
                let approved = decision.is_ok();
                self.cycle.approval_decided(approved).map_err(ReploidError::Cycle)?;
                if approved {
                    self.verification.commit(change_set).await.map_err(ReploidError::Verification)?;
                    context
                        .append(
                            Message::new(Role::ToolResult, "core change set approved and committed".to_string()),
                            self.llm.as_ref(),
                        )
                        .await;
                    self.episodic_memory.append(format!("approved and committed core change set touching {}", core_paths.join(","))).await?;
                    self.cycle.act_done(true).map_err(ReploidError::Cycle)?;
                    Ok(false)
                } else {
                    context
                        .append(Message::new(Role::ToolResult, "core change set rejected".to_string()), self.llm.as_ref())
                        .await;
                    Ok(true)
                }
            }
            Err(e) => {
                context.append(Message::new(Role::ToolResult, e.to_string()), self.llm.as_ref()).await;
                self.cycle.act_done(false).map_err(ReploidError::Cycle)?;
                Ok(false)
            }
        }
    }

    pub async fn export_run(&self) -> Result<RunBundle, ReploidError> {
        let ExportBundle { files } = self.vfs.export_all().await?;
        let bundle = self.audit.export_run();
        let encoded: BTreeMap<String, String> = files
            .iter()
            .map(|f| (f.path.clone(), base64::engine::general_purpose::STANDARD.encode(&f.content)))
            .collect();
        Ok(RunBundle {
            version: RunBundleVersion { major: CURRENT_MAJOR, minor: 0 },
            exported_at: Utc::now(),
            manifest: RunManifest {
                total_cycles: self.cycle.cycle_count(),
                file_count: encoded.len(),
                event_count: bundle.events.len(),
            },
            state: self.cycle.state(),
            events: bundle.events,
            files: encoded,
        })
    }

    pub async fn import_run(&self, bundle: RunBundle) -> Result<(), ReploidError> {
        if bundle.version.major != CURRENT_MAJOR {
            return Err(ReploidError::Config(format!(
                "unsupported run bundle version {}.{}",
                bundle.version.major, bundle.version.minor
            )));
        }
        let mut files = Vec::with_capacity(bundle.files.len());
        for (path, encoded) in bundle.files {
            let content = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| ReploidError::Config(format!("bad base64 for {path}: {e}")))?;
            files.push(FileEntry {
                path,
                content,
                updated_at: Utc::now(),
                logical_clock: self.vfs.current_clock(),
                origin_peer: self.vfs.peer_id().to_string(),
            });
        }
        self.vfs.import_all(ExportBundle { files }, true).await?;
        self.audit.import_run(AuditBundle { events: bundle.events });
        Ok(())
    }

    /// Record a core-path approval decision made out-of-band (the `approve`
    /// CLI subcommand, driven by a human reading `pending()`).
    pub fn decide_approval(&self, approval_id: &str, approved: bool) -> Result<(), ReploidError> {
        self.hitl.decide(approval_id, approved, None).map_err(ReploidError::Hitl)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::config::HitlMode;
    use crate::error::ToolError;
    use crate::llm::RecordedLlmClient;
    use crate::tools::{ToolBody, ToolContext, ToolDefinition};

    struct ChangeSetTool {
        path: &'static str,
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl ToolBody for ChangeSetTool {
        async fn call(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!({
                "change_set": [{
                    "op": "write",
                    "path": self.path,
                    "content_b64": base64::engine::general_purpose::STANDARD.encode(&self.bytes),
                }]
            }))
        }
    }

    fn register_change_set_tool(kernel: &Kernel, id: &str, path: &'static str, bytes: &[u8]) {
        kernel
            .tools
            .register(
                ToolDefinition {
                    id: id.to_string(),
                    description: "writes a fixed change set".to_string(),
                    input_schema: json!({"type": "object"}),
                    capabilities: vec![],
                    body_ref: format!("/tools/{id}"),
                },
                Arc::new(ChangeSetTool { path, bytes: bytes.to_vec() }),
            )
            .unwrap();
    }

    async fn build_kernel(config: &ReploidConfig, responses: Vec<CompletionResponse>, granted: Vec<Capability>) -> Arc<Kernel> {
        let llm: Arc<dyn LlmClient> = Arc::new(RecordedLlmClient::new(responses));
        Kernel::new(config, llm, "test-peer", granted).unwrap()
    }

    #[tokio::test]
    async fn new_wires_the_network_fetch_tool_into_the_registry() {
        let kernel = build_kernel(&ReploidConfig::default(), vec![], vec![]).await;
        let ids: Vec<String> = kernel.tools.list().iter().map(|d| d.id.clone()).collect();
        assert!(ids.contains(&"network_fetch".to_string()));
    }

    #[tokio::test]
    async fn run_goal_halts_cleanly_on_a_plain_text_response() {
        let kernel = build_kernel(&ReploidConfig::default(), vec![CompletionResponse::Text("done".into())], vec![]).await;
        let outcome = kernel.run_goal("say hello").await.unwrap();
        assert_eq!(outcome.state, CycleState::Halted);
        assert!(!outcome.breaker_tripped);
        assert!(!outcome.approval_rejected);
    }

    #[tokio::test]
    async fn run_goal_commits_a_non_core_change_set() {
        let mut config = ReploidConfig::default();
        config.hitl.mode = HitlMode::Off;
        let granted = vec![Capability::WriteVfs(BTreeSet::from(["/tools".to_string()]))];
        let responses = vec![
            CompletionResponse::ToolCall(ToolCallRequest { name: "write_tool".into(), arguments: json!({}) }),
            CompletionResponse::Text("done".into()),
        ];
        let kernel = build_kernel(&config, responses, granted).await;
        register_change_set_tool(&kernel, "write_tool", "/tools/Greeter", b"fn greet() {}");

        let outcome = kernel.run_goal("add a tool").await.unwrap();
        assert_eq!(outcome.state, CycleState::Halted);
        assert!(!outcome.approval_rejected);
        assert_eq!(kernel.vfs.read("/tools/Greeter").await.unwrap(), b"fn greet() {}");
    }

    #[tokio::test]
    async fn run_goal_reports_a_rejected_core_path_change() {
        let mut config = ReploidConfig::default();
        config.hitl.mode = HitlMode::Hitl;
        config.hitl.timeout_minutes = 0;
        let granted = vec![Capability::WriteVfs(BTreeSet::from(["/core".to_string()]))];
        let responses = vec![
            CompletionResponse::ToolCall(ToolCallRequest { name: "write_core".into(), arguments: json!({}) }),
            CompletionResponse::Text("done".into()),
        ];
        let kernel = build_kernel(&config, responses, granted).await;
        register_change_set_tool(&kernel, "write_core", "/core/agent.js", b"new core body");

        let outcome = kernel.run_goal("patch core").await.unwrap();
        assert_eq!(outcome.state, CycleState::Halted);
        assert!(outcome.approval_rejected);
        assert!(kernel.vfs.read("/core/agent.js").await.is_err());
    }

    #[tokio::test]
    async fn export_then_import_round_trips_vfs_contents() {
        let kernel = build_kernel(&ReploidConfig::default(), vec![], vec![]).await;
        kernel.vfs.write("/a", b"hello".to_vec()).await.unwrap();
        let bundle = kernel.export_run().await.unwrap();

        let other = build_kernel(&ReploidConfig::default(), vec![], vec![]).await;
        other.import_run(bundle).await.unwrap();
        assert_eq!(other.vfs.read("/a").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn import_rejects_a_future_major_version() {
        let kernel = build_kernel(&ReploidConfig::default(), vec![], vec![]).await;
        let mut bundle = kernel.export_run().await.unwrap();
        bundle.version.major = CURRENT_MAJOR + 1;
        let err = kernel.import_run(bundle).await;
        assert!(matches!(err, Err(ReploidError::Config(_))));
    }
}
