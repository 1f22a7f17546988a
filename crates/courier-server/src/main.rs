//! # Courier Server
//!
//! Real-time message delivery hub.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with custom config
//! courier /path/to/courier.toml
//!
//! # Run with environment variables
//! COURIER_PORT=8080 COURIER_ENV=development courier
//! ```

mod config;
mod limits;
mod listener;
mod logging;
mod metrics;
mod status;

use anyhow::{Context, Result};
use courier_core::{Hub, LogPresence};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = config::Config::load(path.as_deref())?;

    logging::init(config.env)?;
    info!(env = %config.env, "Starting Courier server on {}:{}", config.host, config.port);
    debug!(
        "Effective configuration:\n{}",
        toml::to_string_pretty(&config).context("Failed to render configuration")?
    );

    match limits::raise_fd_limit() {
        Ok((previous, current)) if current > previous => {
            info!(previous, current, "Raised open file limit");
        }
        Ok((_, current)) => debug!(current, "Open file limit unchanged"),
        Err(e) => warn!(error = %e, "Failed to raise open file limit"),
    }

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let hub = Arc::new(Hub::new(
        config.hub_config(),
        config.router_config(),
        Arc::new(LogPresence),
    )?);
    hub.start()?;

    let upgrades = listener::bind(config.bind_addr()?).await?;
    let accept_task = tokio::spawn(listener::run(
        upgrades,
        Arc::clone(&hub),
        config.upgrade_config(),
    ));

    let status_task = if config.status.enabled {
        let addr = config.status_addr()?;
        let hub = Arc::clone(&hub);
        Some(tokio::spawn(async move {
            if let Err(e) = status::run_status_server(addr, hub).await {
                error!("{:#}", e);
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;

    accept_task.abort();
    hub.shutdown(config.grace()).await;
    if let Some(task) = status_task {
        task.abort();
    }

    info!("Courier server stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
