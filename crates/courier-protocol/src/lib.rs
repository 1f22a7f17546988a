//! # courier-protocol
//!
//! Wire protocol definitions for the Courier delivery hub.
//!
//! Clients send [`EventFrame`]s as JSON text. The hub answers every frame
//! with exactly one [`RoutingStatus`], also JSON text.
//!
//! ## Status codes
//!
//! | code  | meaning                              |
//! |-------|--------------------------------------|
//! | 0     | event validated and routed           |
//! | 90001 | frame failed to decode               |
//! | 90002 | sender identity invalid              |
//! | 90003 | event type or room identifier invalid |
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, Event, RoutingStatus};
//!
//! let raw = br#"{"type":"message","senderId":"alice","roomId":"r1","payload":"hi"}"#;
//! let event = Event::ingest(codec::decode_event(raw).unwrap());
//! let ack = codec::encode_status(&RoutingStatus::sent(&event)).unwrap();
//! ```

pub mod codec;
pub mod event;
pub mod status;

pub use codec::{decode_event, encode_event, encode_status, ProtocolError, MAX_FRAME_SIZE};
pub use event::{Event, EventFrame, EventType};
pub use status::{RoutingStatus, StatusCode};
