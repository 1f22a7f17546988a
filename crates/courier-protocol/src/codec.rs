//! Codec for encoding and decoding Courier frames.
//!
//! Frames are JSON text. The WebSocket layer already delimits messages, so
//! there is no length prefix: one WebSocket message carries one frame.

use bytes::Bytes;
use thiserror::Error;

use crate::event::{Event, EventFrame};
use crate::status::RoutingStatus;

/// Maximum inbound frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decode an inbound event frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid event object.
pub fn decode_event(data: &[u8]) -> Result<EventFrame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Encode a routing status for delivery.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_status(status: &RoutingStatus) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(status)
        .map(Bytes::from)
        .map_err(ProtocolError::Encode)
}

/// Encode an ingested event.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_event(event: &Event) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(event)
        .map(Bytes::from)
        .map_err(ProtocolError::Encode)
}
