mod command;
mod source;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use foreman_core::ServerBuilder;
use foreman_core::config::ServerConfig;
use foreman_core::domain::{EventKind, IntegrationEvent};
use foreman_core::impls::{FileStateStore, InMemoryStateStore};
use foreman_core::ports::{Clock, ResultContinuityStore, SystemClock};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::source::FileConfiguration;

#[derive(Debug, Parser)]
#[command(name = "foreman", version, about = "Continuous-integration build scheduler")]
struct Cli {
    /// Server configuration file.
    #[arg(long, short, default_value = "foreman.toml")]
    config: PathBuf,

    /// Overrides `state_dir` from the configuration file.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Print the server snapshot as JSON on shutdown.
    #[arg(long, default_value_t = false)]
    snapshot: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = ServerConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let store: Arc<dyn ResultContinuityStore> = match cli.state_dir.or(config.state_dir.clone()) {
        Some(dir) => Arc::new(FileStateStore::new(dir)),
        None => {
            warn!("no state_dir configured; results are kept in memory");
            Arc::new(InMemoryStateStore::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let server = ServerBuilder::new()
        .name(config.name.clone())
        .configuration_source(Arc::new(FileConfiguration::new(&cli.config, Arc::clone(&clock))))
        .state_store(store)
        .clock(clock)
        .build()?;

    server.events().on_integration(|event: &IntegrationEvent| {
        if event.kind == EventKind::IntegrationCompleted {
            info!(project = %event.project, status = ?event.status, label = ?event.label, "integration completed");
        }
    });

    server.start();
    info!(server = server.name(), projects = ?server.project_names(), "foreman running");

    wait_for_shutdown(&server).await?;

    server.stop();
    server.wait_for_exit().await;

    if cli.snapshot {
        let snapshot = server.get_cruise_server_snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    server.dispose().await;
    Ok(())
}

/// Ctrl-C shuts down; on unix, SIGHUP reloads the configuration and restarts.
#[cfg(unix)]
async fn wait_for_shutdown(server: &foreman_core::OrchestrationServer) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("shutting down");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("reloading configuration");
                if let Err(e) = server.restart().await {
                    warn!(error = %e, "restart failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_server: &foreman_core::OrchestrationServer) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
