//! Headless CLI for the REPLOID agent runtime.
//!
//! Grounded on `bin/cli.rs`'s `clap`-derive shape (top-level
//! `Cli { command, ... }` plus one `Subcommand` per surface), generalized
//! from gateway-over-WebSocket dispatch to driving a [`reploid_core::composition::Kernel`]
//! directly in-process.
//!
//! Exit codes (run subcommand only; every other subcommand exits 0 on
//! success, 1 on error):
//!   0 goal completed
//!   1 other error (config, I/O, transport)
//!   2 a core-path change was rejected by a human
//!   3 a budget breaker tripped the cycle
//!   4 verification failed

mod logging;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use reploid_core::composition::Kernel;
use reploid_core::config::{load_config, load_default_config, ReploidConfig};
use reploid_core::cycle::CycleState;
use reploid_core::llm::{HttpLlmClient, HttpLlmClientConfig, LlmClient};
use reploid_core::tools::Capability;
use reploid_core::ReploidError;

#[derive(Parser, Debug)]
#[command(name = "reploid", about = "REPLOID self-modifying agent runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a `config.toml`. Defaults to `~/.reploid/config.toml`
    /// (or `$REPLOID_CONFIG` if set).
    #[arg(long, global = true, env = "REPLOID_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one Think -> Act -> Observe -> Reflect session toward a goal.
    Run(RunArgs),
    /// Export the live run (VFS contents, audit log, cycle state) to a bundle file.
    Export(ExportArgs),
    /// Import a previously exported run bundle, replacing the live VFS.
    Import(ImportArgs),
    /// Create, restore, or list point-in-time VFS snapshots.
    Snapshot(SnapshotArgs),
    /// Record a human decision on a pending core-path approval.
    Approve(ApproveArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Natural-language goal handed to the agent.
    goal: String,

    /// VFS path prefix the agent may write under. Repeatable.
    #[arg(long = "write", value_name = "PREFIX")]
    write_prefixes: Vec<String>,

    /// Host the `network_fetch` tool may reach. Repeatable.
    #[arg(long = "network-host", value_name = "HOST")]
    network_hosts: Vec<String>,

    /// Peer identity stamped on this VFS's writes (swarm sync origin tag).
    #[arg(long, env = "REPLOID_PEER_ID", default_value = "local")]
    peer_id: String,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Parser, Debug)]
struct LlmArgs {
    #[arg(long, env = "REPLOID_LLM_API_KEY", default_value = "")]
    llm_api_key: String,

    #[arg(long, env = "REPLOID_LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    llm_base_url: String,

    #[arg(long, env = "REPLOID_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Output file. Defaults to `run.json` in the current directory.
    #[arg(default_value = "run.json")]
    file: PathBuf,
}

#[derive(Parser, Debug)]
struct ImportArgs {
    file: PathBuf,
}

#[derive(Parser, Debug)]
struct SnapshotArgs {
    #[command(subcommand)]
    action: SnapshotAction,
}

#[derive(Subcommand, Debug)]
enum SnapshotAction {
    Create { name: String },
    Restore { name: String },
    List,
}

#[derive(Parser, Debug)]
struct ApproveArgs {
    id: String,
    decision: Decision,
}

#[derive(ValueEnum, Clone, Debug)]
enum Decision {
    Yes,
    No,
}

fn resolve_config(cli: &Cli) -> ReploidConfig {
    match &cli.config {
        Some(path) => load_config(path).unwrap_or_default(),
        None => load_default_config(),
    }
}

fn build_llm_client(args: &LlmArgs) -> Result<Arc<dyn LlmClient>, ReploidError> {
    let client = HttpLlmClient::new(HttpLlmClientConfig {
        api_key: args.llm_api_key.clone(),
        base_url: args.llm_base_url.clone(),
        model: args.llm_model.clone(),
        ..Default::default()
    })
    .map_err(ReploidError::Llm)?;
    Ok(Arc::new(client))
}

fn default_grants(write_prefixes: &[String], network_hosts: &[String]) -> Vec<Capability> {
    let mut grants = vec![Capability::ReadVfs, Capability::InvokeTool];
    if !write_prefixes.is_empty() {
        grants.push(Capability::WriteVfs(write_prefixes.iter().cloned().collect::<BTreeSet<_>>()));
    }
    if !network_hosts.is_empty() {
        grants.push(Capability::NetworkFetch(network_hosts.iter().cloned().collect::<BTreeSet<_>>()));
    }
    grants
}

async fn run_goal_command(cli: &Cli, args: &RunArgs) -> ExitCode {
    let config = resolve_config(cli);
    let llm = match build_llm_client(&args.llm) {
        Ok(llm) => llm,
        Err(e) => {
            tracing::error!(error = %e, "failed to build llm client");
            return ExitCode::from(1);
        }
    };
    let grants = default_grants(&args.write_prefixes, &args.network_hosts);

    let kernel = match Kernel::new(&config, llm, args.peer_id.clone(), grants) {
        Ok(k) => k,
        Err(e) => {
            tracing::error!(error = %e, "failed to build kernel");
            return ExitCode::from(1);
        }
    };

    match kernel.run_goal(&args.goal).await {
        Ok(outcome) => {
            tracing::info!(state = ?outcome.state, breaker_tripped = outcome.breaker_tripped, approval_rejected = outcome.approval_rejected, "run finished");
            if outcome.approval_rejected {
                ExitCode::from(2)
            } else if outcome.breaker_tripped {
                ExitCode::from(3)
            } else if matches!(outcome.state, CycleState::Errored { .. }) {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(ReploidError::Verification(e)) => {
            tracing::error!(error = %e, "verification failed");
            ExitCode::from(4)
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::from(1)
        }
    }
}

async fn export_command(cli: &Cli, args: &ExportArgs) -> ExitCode {
    let config = resolve_config(cli);
    let llm: Arc<dyn LlmClient> = Arc::new(reploid_core::llm::RecordedLlmClient::new(Vec::new()));
    let kernel = match Kernel::new(&config, llm, "local", vec![Capability::ReadVfs, Capability::InvokeTool]) {
        Ok(k) => k,
        Err(e) => {
            tracing::error!(error = %e, "failed to build kernel");
            return ExitCode::from(1);
        }
    };
    match kernel.export_run().await {
        Ok(bundle) => match serde_json::to_vec_pretty(&bundle) {
            Ok(bytes) => match std::fs::write(&args.file, bytes) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "failed to write bundle");
                    ExitCode::from(1)
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize bundle");
                ExitCode::from(1)
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "export failed");
            ExitCode::from(1)
        }
    }
}

async fn import_command(cli: &Cli, args: &ImportArgs) -> ExitCode {
    let config = resolve_config(cli);
    let bytes = match std::fs::read(&args.file) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to read bundle file");
            return ExitCode::from(1);
        }
    };
    let bundle = match serde_json::from_slice(&bytes) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to parse bundle file");
            return ExitCode::from(1);
        }
    };
    let llm: Arc<dyn LlmClient> = Arc::new(reploid_core::llm::RecordedLlmClient::new(Vec::new()));
    let kernel = match Kernel::new(&config, llm, "local", vec![Capability::ReadVfs, Capability::InvokeTool]) {
        Ok(k) => k,
        Err(e) => {
            tracing::error!(error = %e, "failed to build kernel");
            return ExitCode::from(1);
        }
    };
    match kernel.import_run(bundle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "import failed");
            ExitCode::from(1)
        }
    }
}

async fn snapshot_command(cli: &Cli, args: &SnapshotArgs) -> ExitCode {
    let config = resolve_config(cli);
    let llm: Arc<dyn LlmClient> = Arc::new(reploid_core::llm::RecordedLlmClient::new(Vec::new()));
    let kernel = match Kernel::new(&config, llm, "local", vec![Capability::ReadVfs, Capability::InvokeTool]) {
        Ok(k) => k,
        Err(e) => {
            tracing::error!(error = %e, "failed to build kernel");
            return ExitCode::from(1);
        }
    };
    let result = match &args.action {
        SnapshotAction::Create { name } => kernel.snapshots.create(name).await.map_err(ReploidError::Snapshot),
        SnapshotAction::Restore { name } => kernel.snapshots.restore(name).await.map_err(ReploidError::Snapshot),
        SnapshotAction::List => match kernel.snapshots.list().await {
            Ok(names) => {
                for name in names {
                    println!("{name}");
                }
                Ok(())
            }
            Err(e) => Err(ReploidError::Snapshot(e)),
        },
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "snapshot command failed");
            ExitCode::from(1)
        }
    }
}

async fn approve_command(cli: &Cli, args: &ApproveArgs) -> ExitCode {
    let config = resolve_config(cli);
    let llm: Arc<dyn LlmClient> = Arc::new(reploid_core::llm::RecordedLlmClient::new(Vec::new()));
    let kernel = match Kernel::new(&config, llm, "local", vec![Capability::ReadVfs, Capability::InvokeTool]) {
        Ok(k) => k,
        Err(e) => {
            tracing::error!(error = %e, "failed to build kernel");
            return ExitCode::from(1);
        }
    };
    let approved = matches!(args.decision, Decision::Yes);
    match kernel.decide_approval(&args.id, approved) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "approval decision failed");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => run_goal_command(&cli, args).await,
        Commands::Export(args) => export_command(&cli, args).await,
        Commands::Import(args) => import_command(&cli, args).await,
        Commands::Snapshot(args) => snapshot_command(&cli, args).await,
        Commands::Approve(args) => approve_command(&cli, args).await,
    }
}
