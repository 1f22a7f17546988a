//! # courier-core
//!
//! Connection registry, event routing and delivery for the Courier hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Live connections, their identities, and their readiness registration
//! - **Router** - Validates inbound frames and produces one routing status each
//! - **Heartbeat** - Periodic presence announcements for the hub
//! - **Hub** - Wires everything together and runs the pumps
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  ready   ┌─────────────┐  frame   ┌─────────────┐
//! │  Registry   │─────────▶│  Mux loop   │─────────▶│   Router    │
//! │  (epoll)    │          │  (thread)   │  (task)  │             │
//! └─────────────┘          └─────────────┘          └─────────────┘
//!        ▲                                                 │ status
//!        │ lookup                                          ▼
//!        │                 ┌─────────────┐          ┌─────────────┐
//!        └─────────────────│  Delivery   │◀─────────│ Output queue│
//!                          │  pump       │          │  (bounded)  │
//!                          └─────────────┘          └─────────────┘
//! ```

mod delivery;
mod mux;

pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{HeartbeatError, HubError};
pub use heartbeat::{Beat, HeartbeatRegistry, HeartbeatState, LogPresence, PresenceStore};
pub use hub::{Hub, HubConfig};
pub use registry::{Ready, Registry};
pub use router::{validate_room_id, Router, RouterConfig};
