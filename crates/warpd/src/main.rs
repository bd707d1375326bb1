//! warpd: the WarpGrid daemon.
//!
//! Loads the orchestrator configuration, registers the configured workers
//! and runs until Ctrl-C:
//! - schedule optimizer loop
//! - cloud deadline watcher and idle shrink
//!
//! # Usage
//!
//! ```text
//! warpd run --config /etc/warpgrid/warpd.toml
//! warpd check-config /etc/warpgrid/warpd.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use warp_core::{OrchestratorConfig, SystemClock};
use warpgrid_orchestrator::{Orchestrator, StaticWorkers};
use warpgrid_state::ProfileStore;

const DEFAULT_FILTER: &str = "info,warpd=debug,warpgrid=debug";

#[derive(Debug, Parser)]
#[command(name = "warpd", about = "WarpGrid daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the orchestrator until interrupted.
    Run {
        /// Orchestrator configuration file.
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Validate a configuration file and print its summary.
    CheckConfig {
        file: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::CheckConfig { file } => check_config(&file),
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_file(path)?;
    println!("{}", serde_json::to_string_pretty(&summary(&config))?);
    Ok(())
}

fn summary(config: &OrchestratorConfig) -> serde_json::Value {
    serde_json::json!({
        "objective": config.scheduler.objective,
        "optimizer": config.optimizer.enabled,
        "cores": config.cores.len(),
        "implementations": config.cores.iter().map(|c| c.implementations.len()).sum::<usize>(),
        "workers": config.workers.iter().map(|w| w.name.as_str()).collect::<Vec<_>>(),
        "cloud": config.cloud.as_ref().map(|c| c.provider.as_str()),
        "profiles": config.profiles.path.as_ref().map(|p| p.display().to_string()),
    })
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_file(path)?;
    info!(config = %path.display(), "WarpGrid daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let profiles = match &config.profiles.path {
        Some(db) => {
            if let Some(parent) = db.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
            }
            ProfileStore::open(db)?
        }
        None => ProfileStore::open_in_memory()?,
    };
    info!(workers = profiles.workers()?.len(), "profile store opened");

    let orchestrator = Arc::new(Orchestrator::new(&config, Arc::new(SystemClock), profiles));
    let attached = orchestrator
        .attach_workers(&StaticWorkers::from_config(&config.workers))
        .await?;
    info!(workers = attached.len(), "static workers registered");

    // ── Background loops ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    if let Err(e) = runner.await {
        warn!(error = %e, "orchestrator task ended abnormally");
    }

    let state = orchestrator.current_state().await;
    debug!(%state, "final state");
    if let Some(report) = orchestrator.shutdown().await {
        info!(
            destroyed = report.destroyed.len(),
            failed = report.failed.len(),
            "cloud resources released"
        );
    }
    info!("WarpGrid daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["warpd", "run", "--config", "w.toml", "--log-json"]).unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Run { config } if config == Path::new("w.toml")));

        let cli = Cli::try_parse_from(["warpd", "check-config", "w.toml"]).unwrap();
        assert!(matches!(cli.command, Command::CheckConfig { .. }));
        assert!(Cli::try_parse_from(["warpd", "run"]).is_err());
    }

    #[test]
    fn summary_lists_workers() {
        let config = OrchestratorConfig::parse(
            r#"
            [[workers]]
            name = "local-1"
            processors = 4

            [[cores]]
            signature = "matmul"
            [[cores.implementations]]
            processors = 2
            avg_time = "3s"
            "#,
        )
        .unwrap();
        let s = summary(&config);
        assert_eq!(s["workers"][0], "local-1");
        assert_eq!(s["implementations"], 1);
        assert_eq!(s["objective"], "time");
        assert!(s["cloud"].is_null());
    }
}
