//! TOML configuration schema for REPLOID.
//!
//! All fields carry `#[serde(default)]` so a partially-filled
//! `config.toml` works correctly; missing sections fall back to their
//! `Default` impl.
//!
//! Example `~/.reploid/config.toml`:
//! ```toml
//! [budgets]
//! context_budget = 32000
//! max_iterations = 50
//!
//! [hitl]
//! mode = "every_n"
//! n = 5
//!
//! [arena]
//! enabled = true
//! competitor_count = 3
//! ```

use serde::{Deserialize, Serialize};

// ─── BudgetsConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetsConfig {
    /// Token budget for the assembled context window.
    pub context_budget: u64,
    /// Hard ceiling on `thinking` entries per cycle.
    pub max_iterations: u32,
    /// Hard ceiling on tokens spent in a single session.
    pub max_session_tokens: u64,
    /// Wall-clock budget per cycle, in milliseconds (0 = unbounded).
    pub wall_clock_ms: u64,
    /// Consecutive tool/LLM failures before the cycle halts.
    pub consecutive_failure_limit: u32,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            context_budget: 32_000,
            max_iterations: 50,
            max_session_tokens: 200_000,
            wall_clock_ms: 0,
            consecutive_failure_limit: 5,
        }
    }
}

// ─── VfsConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VfsConfig {
    /// Files larger than this fail `read()` with `FileTooLarge`.
    pub file_read_ceiling_bytes: u64,
    /// Cumulative byte ceiling across all stored files.
    pub total_quota_bytes: u64,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            file_read_ceiling_bytes: 1024 * 1024,
            total_quota_bytes: 512 * 1024 * 1024,
        }
    }
}

// ─── ToolsConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub tool_timeout_ms: u64,
    pub output_ceiling_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: 30_000,
            output_ceiling_bytes: 256 * 1024,
        }
    }
}

// ─── HitlMode / HitlConfig ───────────────────────────────────────────────────

/// Controls how often the gate requires a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HitlMode {
    /// Every gated change is auto-approved.
    Off,
    /// Every gated change requires a human decision.
    #[default]
    Hitl,
    /// Every n-th gated change requires a human decision; the rest auto-approve.
    EveryN,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HitlConfig {
    pub mode: HitlMode,
    pub n: u32,
    /// Minutes before a pending approval expires (treated as rejection).
    pub timeout_minutes: u64,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            mode: HitlMode::default(),
            n: 5,
            timeout_minutes: 15,
        }
    }
}

// ─── ArenaConfig ─────────────────────────────────────────────────────────────

/// Secondary ranking key when arena results tie on PASS/FAIL/ERROR status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArenaRankBy {
    #[default]
    WallClock,
    Tokens,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArenaConfig {
    pub enabled: bool,
    pub competitor_count: usize,
    pub rank_by: ArenaRankBy,
    pub competitor_timeout_ms: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            competitor_count: 3,
            rank_by: ArenaRankBy::default(),
            competitor_timeout_ms: 60_000,
        }
    }
}

// ─── SwarmConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwarmConfig {
    pub enabled: bool,
    pub room_token: String,
    pub max_payload_bytes: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            room_token: String::new(),
            max_payload_bytes: 1024 * 1024,
        }
    }
}

// ─── SnapshotConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Named snapshots beyond this count are pruned oldest-first (genesis
    /// is never pruned).
    pub retention: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { retention: 20 }
    }
}

// ─── ReploidConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ReploidConfig {
    pub budgets: BudgetsConfig,
    pub vfs: VfsConfig,
    pub tools: ToolsConfig,
    pub hitl: HitlConfig,
    pub arena: ArenaConfig,
    pub swarm: SwarmConfig,
    pub snapshot: SnapshotConfig,
}
