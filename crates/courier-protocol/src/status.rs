//! Routing outcomes reported back to clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Status codes carried in a [`RoutingStatus`].
///
/// The numeric values are part of the wire contract with clients and must
/// never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum StatusCode {
    /// Event validated and routed.
    Success = 0,
    /// Frame failed to decode.
    InvalidPacket = 90001,
    /// Sender identity invalid or unrecognized.
    InvalidSender = 90002,
    /// Event type or room identifier invalid.
    InvalidEventTypeOrRoom = 90003,
}

impl StatusCode {
    /// Short label, used for metrics.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::InvalidPacket => "invalid_packet",
            StatusCode::InvalidSender => "invalid_sender",
            StatusCode::InvalidEventTypeOrRoom => "invalid_event_type_or_room",
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        code as u32
    }
}

impl TryFrom<u32> for StatusCode {
    type Error = &'static str;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusCode::Success),
            90001 => Ok(StatusCode::InvalidPacket),
            90002 => Ok(StatusCode::InvalidSender),
            90003 => Ok(StatusCode::InvalidEventTypeOrRoom),
            _ => Err("Invalid status code"),
        }
    }
}

/// The outcome of routing one inbound frame.
///
/// `sender_id` is always the identity of the connection the frame arrived
/// on, which is where the status is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStatus {
    /// The event this outcome pertains to.
    pub event_id: Uuid,
    /// The user the outcome is reported to.
    pub sender_id: String,
    /// Whether routing succeeded.
    pub success: bool,
    /// Machine-readable outcome.
    pub status_code: StatusCode,
    /// Human-readable diagnostic.
    pub reason: String,
}

impl RoutingStatus {
    /// The event was accepted.
    #[must_use]
    pub fn sent(event: &Event) -> Self {
        Self {
            event_id: event.id(),
            sender_id: event.sender_id.clone(),
            success: true,
            status_code: StatusCode::Success,
            reason: "sent successfully".to_string(),
        }
    }

    /// The frame could not be decoded. There is no usable event, so a fresh
    /// id is generated.
    #[must_use]
    pub fn invalid_packet(origin: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            sender_id: origin.into(),
            success: false,
            status_code: StatusCode::InvalidPacket,
            reason: format!("Failed to parse invalid packet: {detail}"),
        }
    }

    /// The claimed sender does not match the connection's identity.
    #[must_use]
    pub fn invalid_sender(origin: impl Into<String>, event: &Event) -> Self {
        Self {
            event_id: event.id(),
            sender_id: origin.into(),
            success: false,
            status_code: StatusCode::InvalidSender,
            reason: format!("Invalid sender {}", event.sender_id),
        }
    }

    /// The event type is not one the router accepts.
    #[must_use]
    pub fn invalid_event_type(origin: impl Into<String>, event: &Event) -> Self {
        Self::rejected(origin, event, format!("Invalid event type {}", event.kind))
    }

    /// The room identifier is malformed.
    #[must_use]
    pub fn invalid_room(origin: impl Into<String>, event: &Event, why: &str) -> Self {
        Self::rejected(origin, event, format!("Invalid room id: {why}"))
    }

    fn rejected(origin: impl Into<String>, event: &Event, reason: String) -> Self {
        Self {
            event_id: event.id(),
            sender_id: origin.into(),
            success: false,
            status_code: StatusCode::InvalidEventTypeOrRoom,
            reason,
        }
    }
}
