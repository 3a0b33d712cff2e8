//! tiller broker daemon
//!
//! Runs on the local machine and serves the desktop client over a
//! localhost IPC socket, driving remote hosts over SSH.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiller_broker::{BrokerState, IpcServer};
use tiller_core::config::{self, BrokerConfig};

#[derive(Parser)]
#[command(name = "tiller-broker")]
#[command(about = "tiller broker daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tiller broker starting...");

    // Load configuration
    let mut broker_config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                BrokerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            BrokerConfig::default()
        }
    };

    if let Some(port) = args.port {
        broker_config.ipc_port = port;
    }

    tracing::info!(
        "Loaded {} connection profile(s)",
        broker_config.connections.len()
    );

    let address = broker_config.ipc_address();
    let state = Arc::new(BrokerState::new(broker_config));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
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

    let server = IpcServer::new(address, state);
    server.run(cancel).await?;

    tracing::info!("Broker shutdown complete");
    Ok(())
}
