//! Daily rolling file logger, grounded on `plugins/logging`'s setup: same
//! `tracing_appender::rolling::daily` + `EnvFilter` shape, pointed at
//! `directories::ProjectDirs` instead of a Tauri-specific path.

use std::sync::OnceLock;

use directories::ProjectDirs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Verbosity follows `RUST_LOG` (defaults to `info`). Logs land under the
/// platform's data directory for `dev.reploid.cli`.
pub fn init() {
    let log_dir = ProjectDirs::from("dev", "reploid", "cli")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "reploid.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .ok();
}
