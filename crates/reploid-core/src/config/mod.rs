//! Layered configuration: defaults, TOML file, environment overrides.

pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config, load_default_config, save_config};
pub use schema::{
    ArenaConfig, ArenaRankBy, BudgetsConfig, HitlConfig, HitlMode, ReploidConfig, SnapshotConfig,
    SwarmConfig, ToolsConfig, VfsConfig,
};
