//! # courier-transport
//!
//! Transport layer for the Courier delivery hub.
//!
//! This crate provides:
//!
//! - **Connection** - The frame-at-a-time, non-blocking connection contract
//! - **Poller** - Kernel readiness notification over many connections (mio)
//! - **WebSocket** - HTTP upgrade and the WebSocket [`Connection`]
//!
//! ## Readiness model
//!
//! Connections are not driven by a task each. The hub registers every
//! connection's descriptor with one [`Poller`] and only reads from the ones
//! the kernel reports ready. Readiness is edge-triggered: a readable
//! connection is read until it has nothing more, and a writable one flushes
//! what earlier writes left queued.
//!
//! ```rust,ignore
//! use courier_transport::{Connection, Events, Poller};
//!
//! let poller = Poller::new()?;
//! poller.add(conn.as_raw_fd())?;
//!
//! let mut events = Events::with_capacity(100);
//! poller.wait(&mut events, None)?;
//! for ready in events.iter() {
//!     let conn = lookup(ready.fd);
//!     if ready.writable {
//!         conn.flush()?;
//!     }
//!     while let Some(frame) = conn.read_frame()? {
//!         // Route frame
//!     }
//! }
//! ```

pub mod poller;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use poller::{Events, Poller, Readiness};
pub use traits::{Connection, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{upgrade, UpgradeConfig, WsConnection};
