//! Event types for the Courier protocol.
//!
//! An [`EventFrame`] is what a client puts on the wire. An [`Event`] is the
//! same data after ingestion: it carries a server-generated identifier and
//! the server receive time, both stamped exactly once by [`Event::ingest`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::codec::{self, ProtocolError};

/// Wire name of the `message` event type.
pub const EVENT_TYPE_MESSAGE: &str = "message";

/// Wire name of the `join_room` event type.
pub const EVENT_TYPE_JOIN_ROOM: &str = "join_room";

/// Event type identifiers.
///
/// Unrecognized names are kept verbatim in [`EventType::Unknown`] so that
/// the router can report them back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A message addressed to a room.
    Message,
    /// A request to join a room.
    JoinRoom,
    /// Anything else the client sent.
    Unknown(String),
}

impl EventType {
    /// Get the wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Message => EVENT_TYPE_MESSAGE,
            EventType::JoinRoom => EVENT_TYPE_JOIN_ROOM,
            EventType::Unknown(name) => name,
        }
    }

    /// Whether this is one of the types the router accepts.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, EventType::Unknown(_))
    }
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Unknown(String::new())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        match name.as_str() {
            EVENT_TYPE_MESSAGE => EventType::Message,
            EVENT_TYPE_JOIN_ROOM => EventType::JoinRoom,
            _ => EventType::Unknown(name),
        }
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> String {
        match kind {
            EventType::Unknown(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event as sent by a client.
///
/// Server-owned fields (`id`, `serverTime`) are not part of this shape and
/// are ignored if a client sends them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Event type.
    #[serde(default, rename = "type")]
    pub kind: EventType,
    /// Claimed sender identity.
    #[serde(default)]
    pub sender_id: String,
    /// Target room.
    #[serde(default)]
    pub room_id: String,
    /// Opaque application payload.
    #[serde(default, deserialize_with = "payload::deserialize")]
    pub payload: Bytes,
    /// Client clock at send time. Informational only.
    #[serde(default)]
    pub sender_time: Option<DateTime<Utc>>,
}

/// An ingested event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    id: Uuid,
    /// Event type.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Claimed sender identity.
    pub sender_id: String,
    /// Target room.
    pub room_id: String,
    /// Opaque application payload.
    #[serde(serialize_with = "payload::serialize")]
    pub payload: Bytes,
    /// Client clock at send time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_time: Option<DateTime<Utc>>,
    server_time: DateTime<Utc>,
}

impl Event {
    /// Ingest a client frame, stamping a fresh id and the server time.
    #[must_use]
    pub fn ingest(frame: EventFrame) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: frame.kind,
            sender_id: frame.sender_id,
            room_id: frame.room_id,
            payload: frame.payload,
            sender_time: frame.sender_time,
            server_time: Utc::now(),
        }
    }

    /// Server-generated event id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Time the server ingested the event.
    #[must_use]
    pub fn server_time(&self) -> DateTime<Utc> {
        self.server_time
    }

    /// Serialize the event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        codec::encode_event(self)
    }
}

/// Payloads travel as JSON strings and are held as raw bytes.
mod payload {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        Ok(text.map(Bytes::from).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::from("message".to_string()), EventType::Message);
        assert_eq!(EventType::from("join_room".to_string()), EventType::JoinRoom);
        assert_eq!(
            EventType::from("leave_room".to_string()),
            EventType::Unknown("leave_room".to_string())
        );
        assert_eq!(String::from(EventType::JoinRoom), "join_room");
        assert!(!EventType::default().is_known());
    }

    #[test]
    fn test_ingest_stamps_id_and_server_time() {
        let before = Utc::now();
        let frame = EventFrame {
            kind: EventType::Message,
            sender_id: "alice".into(),
            room_id: "r1".into(),
            payload: Bytes::from_static(b"hi"),
            sender_time: None,
        };

        let first = Event::ingest(frame.clone());
        let second = Event::ingest(frame);

        assert_ne!(first.id(), second.id());
        assert!(first.server_time() >= before);
        assert_eq!(first.sender_id, "alice");
        assert_eq!(&first.payload[..], b"hi");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = Event::ingest(EventFrame {
            kind: EventType::JoinRoom,
            sender_id: "bob".into(),
            room_id: "lobby".into(),
            payload: Bytes::new(),
            sender_time: None,
        });

        let value: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "join_room");
        assert_eq!(value["senderId"], "bob");
        assert_eq!(value["roomId"], "lobby");
        assert_eq!(value["id"], event.id().to_string());
        assert!(value.get("serverTime").is_some());
        assert!(value.get("senderTime").is_none());
    }
}
