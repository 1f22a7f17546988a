//! Prometheus export.
//!
//! The core records through the `metrics` facade; this installs the
//! recorder and its HTTP listener.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Start the Prometheus metrics server and describe the hub's metrics.
///
/// Must be called from within the tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    courier_core::metrics::describe();

    info!("Metrics server listening on {}", addr);
    Ok(())
}
