//! Status HTTP endpoints.

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use courier_core::Hub;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Body of `GET /`, on both the status port and the upgrade port.
pub const HELLO: &str = "hello world";

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Server version.
    pub version: &'static str,
    /// The hub's identity.
    pub hub_id: String,
    /// Registered connections.
    pub connections: usize,
}

/// Build the status router.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .with_state(hub)
}

/// Serve the status endpoints until the task is dropped.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or serving fails.
pub async fn run_status_server(addr: SocketAddr, hub: Arc<Hub>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status server to {addr}"))?;

    info!("Status server listening on http://{}", addr);
    axum::serve(listener, router(hub))
        .await
        .context("Status server failed")?;

    Ok(())
}

async fn index_handler() -> &'static str {
    HELLO
}

async fn health_handler(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    Json(health(&hub))
}

fn health(hub: &Hub) -> Health {
    Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        hub_id: hub.id().to_string(),
        connections: hub.connection_count(),
    }
}
