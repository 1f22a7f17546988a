//! Error types for the hub.

use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Hub and connection registry errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The readiness notifier could not be created.
    #[error("Failed to create poller: {0}")]
    Poller(#[source] io::Error),

    /// Registering a connection with the readiness notifier failed.
    #[error("Failed to register fd {fd}: {source}")]
    Register {
        /// The connection's descriptor.
        fd: RawFd,
        /// The OS error.
        #[source]
        source: io::Error,
    },

    /// Deregistering a connection from the readiness notifier failed.
    #[error("Failed to deregister fd {fd}: {source}")]
    Deregister {
        /// The connection's descriptor.
        fd: RawFd,
        /// The OS error.
        #[source]
        source: io::Error,
    },

    /// Waiting for readiness failed.
    #[error("Readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    /// The registry holds the maximum number of connections.
    #[error("Connection limit reached ({0})")]
    CapacityReached(usize),

    /// `start` was called outside a tokio runtime.
    #[error("Hub must be started from within a tokio runtime")]
    NoRuntime,

    /// `start` was called twice.
    #[error("Hub already started")]
    AlreadyStarted,

    /// The multiplexer thread could not be spawned.
    #[error("Failed to spawn multiplexer thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Heartbeat errors.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// The presence store rejected a beat.
    #[error("Presence store error: {0}")]
    Store(String),
}
