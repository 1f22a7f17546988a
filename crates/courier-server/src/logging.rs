//! Tracing subscriber setup.

use crate::config::EnvType;
use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the environment's default directive. Production logs
/// are JSON lines; other environments are human-readable.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init(env: EnvType) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(env.default_filter()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if env.json_logs() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_thread_names(true))
            .try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}
