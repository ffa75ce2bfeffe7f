//! warren coordinator daemon
//!
//! Serves the agent stream listener and runs the proxy/certificate monitor
//! until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wr_core::config::{self, CoordinatorConfig};
use wr_core::memory::Snapshot;
use wr_core::MemoryStore;
use wr_coordinator::server::AgentListener;
use wr_coordinator::CoordinatorState;

#[derive(Parser)]
#[command(name = "wr-coordinator")]
#[command(about = "warren mesh coordinator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Mesh snapshot (overrides config)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("warren coordinator starting...");

    let config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                CoordinatorConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            CoordinatorConfig::default()
        }
    };

    let bind_addr = args.bind.unwrap_or_else(|| config.bind_address.clone());
    let snapshot_path = args.snapshot.unwrap_or_else(|| config.snapshot_path.clone());

    let store = match MemoryStore::load(&snapshot_path).await {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!("Starting with an empty mesh, snapshot {:?} unusable: {}", snapshot_path, e);
            MemoryStore::new(Snapshot::default())
        }
    };

    let state = CoordinatorState::new(config, Arc::new(store))
        .context("Failed to initialize coordinator")?;

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let monitor = Arc::clone(&state.monitor);
    let monitor_cancel = cancel.clone();
    let monitor_task = tokio::spawn(async move { monitor.run(monitor_cancel).await });

    let listener = AgentListener::bind(&bind_addr).await?;
    let server = AgentListener::new(
        Arc::clone(&state.dispatcher),
        Arc::clone(&state.connections),
        cancel.clone(),
    );
    let served = server.run(listener).await;

    cancel.cancel();
    if let Err(e) = monitor_task.await {
        tracing::warn!("Monitor task ended abnormally: {}", e);
    }

    served?;
    tracing::info!("Coordinator shutdown complete");
    Ok(())
}
