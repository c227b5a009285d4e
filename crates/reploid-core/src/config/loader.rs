//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.reploid/config.toml` (or the path in `REPLOID_CONFIG`)
//! 2. Apply `REPLOID_*` environment variable overrides
//! 3. Fall back to [`ReploidConfig::default`] if the file is missing
//!
//! # Atomic save
//! Writes to `<path>.tmp` then renames over `<path>` so a crash mid-write
//! never leaves a truncated config file behind.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::{HitlMode, ReploidConfig};
use crate::error::ReploidError;

/// Return the default config file path: `~/.reploid/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ReploidError> {
    directories::UserDirs::new()
        .map(|u| u.home_dir().join(".reploid").join("config.toml"))
        .ok_or_else(|| ReploidError::Config("could not determine home directory".into()))
}

/// Load [`ReploidConfig`] from `path`, falling back to defaults if the file
/// does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<ReploidConfig, ReploidError> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<ReploidConfig>(&content)
            .map_err(|e| ReploidError::Config(format!("failed to parse {path:?}: {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ReploidConfig::default(),
        Err(e) => {
            return Err(ReploidError::Config(format!(
                "failed to read {path:?}: {e}"
            )));
        }
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `REPLOID_CONFIG` if set),
/// returning defaults on any error rather than failing startup.
pub fn load_default_config() -> ReploidConfig {
    let path = env::var("REPLOID_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")));
    load_config(&path).unwrap_or_default()
}

/// Apply `REPLOID_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `REPLOID_CONTEXT_BUDGET`    -> `budgets.context_budget`
/// - `REPLOID_MAX_ITERATIONS`    -> `budgets.max_iterations`
/// - `REPLOID_HITL_MODE`         -> `hitl.mode` (`off`|`hitl`|`every_n`)
/// - `REPLOID_HITL_N`            -> `hitl.n`
/// - `REPLOID_ARENA_ENABLED`     -> `arena.enabled` (1/0/true/false)
/// - `REPLOID_SWARM_ENABLED`     -> `swarm.enabled` (1/0/true/false)
/// - `REPLOID_SWARM_ROOM_TOKEN`  -> `swarm.room_token`
fn apply_env_overrides(config: &mut ReploidConfig) {
    if let Ok(v) = env::var("REPLOID_CONTEXT_BUDGET") {
        if let Ok(n) = v.parse() {
            config.budgets.context_budget = n;
        }
    }
    if let Ok(v) = env::var("REPLOID_MAX_ITERATIONS") {
        if let Ok(n) = v.parse() {
            config.budgets.max_iterations = n;
        }
    }
    if let Ok(v) = env::var("REPLOID_HITL_MODE") {
        config.hitl.mode = match v.to_ascii_lowercase().as_str() {
            "off" => HitlMode::Off,
            "every_n" => HitlMode::EveryN,
            _ => HitlMode::Hitl,
        };
    }
    if let Ok(v) = env::var("REPLOID_HITL_N") {
        if let Ok(n) = v.parse() {
            config.hitl.n = n;
        }
    }
    if let Ok(v) = env::var("REPLOID_ARENA_ENABLED") {
        config.arena.enabled = is_truthy(&v);
    }
    if let Ok(v) = env::var("REPLOID_SWARM_ENABLED") {
        config.swarm.enabled = is_truthy(&v);
    }
    if let Ok(v) = env::var("REPLOID_SWARM_ROOM_TOKEN") {
        config.swarm.room_token = v;
    }
}

fn is_truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

/// Save `config` to `path` atomically: write to `<path>.tmp`, then rename.
pub fn save_config(config: &ReploidConfig, path: &Path) -> Result<(), ReploidError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = toml::to_string_pretty(config)
        .map_err(|e| ReploidError::Config(format!("failed to serialize config: {e}")))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, serialized)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are single-threaded.
mod tests {
    use super::*;
    use crate::config::schema::HitlMode;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, ReploidConfig::default());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ReploidConfig::default();
        config.budgets.max_iterations = 7;
        config.hitl.mode = HitlMode::EveryN;
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn env_overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "").unwrap();

        // SAFETY: test-local env var, not read concurrently by other tests in this module.
        unsafe {
            env::set_var("REPLOID_MAX_ITERATIONS", "9");
        }
        let config = load_config(&path).unwrap();
        unsafe {
            env::remove_var("REPLOID_MAX_ITERATIONS");
        }
        assert_eq!(config.budgets.max_iterations, 9);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not valid toml [[[").unwrap();
        assert!(load_config(&path).is_err());
    }
}
