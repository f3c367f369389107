//! rigflowd — the test campaign dispatcher daemon.
//!
//! Single binary that assembles a campaign from one config file:
//! - Registry (pools, agents, platforms) from the declared topology
//! - Checkpoint store (redb) under the data directory
//! - Job backend (REST or dry-run) per the `[backend]` section
//! - Campaign loop, run to completion
//!
//! # Usage
//!
//! ```text
//! rigflowd run --config campaign.toml --data-dir /var/lib/rigflow
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rigflow_registry::Registry;
use rigflow_scheduler::{Campaign, CampaignOptions, JobBackend};
use rigflow_state::CheckpointStore;

mod backend;
mod config;
mod scripts;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "rigflowd", about = "Test campaign dispatcher daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one campaign to completion.
    Run {
        /// Campaign configuration file.
        #[arg(long, default_value = "campaign.toml")]
        config: PathBuf,

        /// Data directory for checkpoints.
        #[arg(long, default_value = "/var/lib/rigflow")]
        data_dir: PathBuf,

        /// Version under test; overrides `[campaign].version`.
        #[arg(long)]
        version: Option<String>,

        /// Seconds between scheduler ticks.
        #[arg(long, default_value = "10")]
        tick_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rigflowd=debug,rigflow=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            version,
            tick_secs,
        } => run_campaign(config, data_dir, version, tick_secs).await,
    }
}

async fn run_campaign(
    config_path: PathBuf,
    data_dir: PathBuf,
    version_override: Option<String>,
    tick_secs: u64,
) -> anyhow::Result<()> {
    let cfg = DaemonConfig::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let version = version_override
        .or_else(|| cfg.campaign.version.clone())
        .context("no version under test: pass --version or set [campaign].version")?;

    info!(%version, config = %config_path.display(), "campaign dispatcher starting");

    // Backend first: its agent inventory feeds the registry diagnostics.
    let backend = backend::build_backend(&cfg.backend)?;
    let backend_agents = match backend.known_agents().await {
        Ok(agents) => agents,
        Err(e) => {
            warn!(error = %e, "could not fetch backend agent inventory, skipping diagnostics");
            Vec::new()
        }
    };

    let registry = Registry::build(&cfg.registry, &backend_agents)?;
    info!(
        pools = registry.pools().len(),
        agents = registry.agents().len(),
        platforms = registry.platforms().len(),
        "registry built"
    );

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("rigflow.redb");
    let store = CheckpointStore::open(&db_path)?;
    info!(path = ?db_path, "checkpoint store opened");

    let scripts = scripts::TemplateScripts::new(&cfg.script);

    let opts = CampaignOptions {
        tick_interval: Duration::from_secs(tick_secs),
        ..CampaignOptions::default()
    };

    let mut campaign = Campaign::new(&version, registry, store, backend, scripts, opts)?;
    let counts = campaign.run().await;

    let buckets = campaign.current_state();
    info!(
        %version,
        done = counts.done,
        blocked = counts.blocked,
        "campaign finished"
    );
    if !buckets.blocked.is_empty() {
        warn!(platforms = ?buckets.blocked, "platforms blocked after exhausting retries");
    }

    Ok(())
}
