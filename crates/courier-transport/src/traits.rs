//! Transport abstraction traits for Courier.
//!
//! The hub multiplexes readiness for every connection through one kernel
//! notifier, so a connection must expose its OS handle explicitly
//! ([`AsRawFd`]) and must support non-blocking, frame-at-a-time I/O.

use bytes::Bytes;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The upgrade handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The upgrade request was refused.
    #[error("Upgrade rejected ({status}): {reason}")]
    Rejected {
        /// HTTP status sent to the client.
        status: u16,
        /// Why the request was refused.
        reason: String,
    },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] courier_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An upgraded, bidirectional client connection.
///
/// All methods take `&self`: the read pump and the delivery pump use the
/// same connection from different threads, so implementations serialize
/// access internally. None of the I/O methods may block on the network.
pub trait Connection: AsRawFd + Send + Sync {
    /// Read the next data frame without blocking.
    ///
    /// Returns `Ok(None)` when no complete frame is available right now.
    /// Control frames are handled internally and never returned.
    ///
    /// # Errors
    ///
    /// Returns an error when the peer closed the connection or the read failed.
    /// Either way the connection is unusable afterwards.
    fn read_frame(&self) -> Result<Option<Bytes>, TransportError>;

    /// Write one frame.
    ///
    /// If the socket is not writable the frame stays queued in the
    /// connection's write buffer until [`Connection::flush`] pushes it out.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, the write buffer is
    /// full, or the write failed.
    fn write_frame(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Write out frames queued by earlier writes.
    ///
    /// Returns `Ok` when nothing is pending or the socket is still not
    /// writable; the rest goes out on the next writable readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write failed.
    fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the connection. Best effort and idempotent.
    fn close(&self);

    /// Get the remote address of the connection, if available.
    fn peer_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
