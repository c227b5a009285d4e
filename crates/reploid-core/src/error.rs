//! Error taxonomy for the REPLOID kernel.
//!
//! Each subsystem owns a focused `thiserror::Error` enum; [`ReploidError`]
//! aggregates them for callers (the CLI, the composition root) that need a
//! single top-level `Result`.

use thiserror::Error;

/// Errors raised by the virtual file system.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("invalid path: {0}")]
    PathInvalid(String),

    #[error("path is read-only: {0}")]
    Readonly(String),

    #[error("write would exceed vfs quota ({used} + {incoming} > {quota} bytes)")]
    QuotaExceeded {
        used: u64,
        incoming: u64,
        quota: u64,
    },

    #[error("file too large to read: {path} ({size} > {ceiling} bytes)")]
    FileTooLarge {
        path: String,
        size: u64,
        ceiling: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors raised by the tool registry and runner.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool id already registered: {0}")]
    AlreadyRegistered(String),

    #[error("malformed schema for tool {0}: {1}")]
    MalformedSchema(String, String),

    #[error("schema violation at {path}: {reason}")]
    SchemaViolation { path: String, reason: String },

    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    #[error("tool timed out after {0}ms")]
    Timeout(u64),

    #[error("tool output exceeded ceiling of {0} bytes")]
    OutputTooLarge(usize),

    #[error("tool raised an error at stage {stage}: {message}")]
    ToolError { stage: String, message: String },

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// Errors raised by the verification pipeline.
#[derive(Debug, Error, Clone)]
pub enum VerificationError {
    #[error("static screen rejected change: rule `{rule}` on `{path}`: {reason}")]
    Static {
        rule: String,
        path: String,
        reason: String,
    },

    #[error("sandbox trial failed: {0}")]
    Sandbox(String),

    #[error("change requires arena consensus or human approval")]
    Gated,
}

/// Errors raised by the HITL controller.
#[derive(Debug, Error)]
pub enum HitlError {
    #[error("approval {0} was rejected")]
    Rejected(String),

    #[error("approval {0} expired before a decision was made")]
    Expired(String),

    #[error("unknown approval id: {0}")]
    UnknownApproval(String),
}

/// Errors raised by the agent cycle engine.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("breaker tripped: {0}")]
    BreakerTripped(String),

    #[error("cycle was cancelled")]
    Cancelled,

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Hitl(#[from] HitlError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Errors raised by the LLM adapter boundary.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("transport error talking to the LLM: {0}")]
    Transport(String),

    #[error("malformed LLM response: {0}")]
    Malformed(String),

    #[error("timed out waiting for the next stream delta")]
    StreamTimeout,
}

/// Errors raised by the snapshot store.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot `{0}` already exists")]
    AlreadyExists(String),

    #[error("unknown snapshot: {0}")]
    UnknownSnapshot(String),

    #[error("genesis snapshot is immutable and cannot be {0}")]
    GenesisImmutable(String),

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// Errors raised by the memory tiers.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// Errors raised by swarm sync.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("invalid envelope: {0}")]
    Protocol(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Top-level error aggregating every subsystem's taxonomy.
#[derive(Debug, Error)]
pub enum ReploidError {
    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Hitl(#[from] HitlError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ReploidResult<T> = Result<T, ReploidError>;
