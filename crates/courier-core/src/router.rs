//! Event router for Courier.
//!
//! The router turns one raw inbound frame into exactly one [`RoutingStatus`]
//! and emits it into a bounded queue consumed by the delivery pump. It owns no
//! connections and performs no I/O, so every decision can be tested in
//! isolation through [`Router::evaluate`].

use crate::metrics;
use courier_protocol::{codec, Event, RoutingStatus};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info, trace, warn};

/// Maximum room id length in bytes.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Validate a room id.
///
/// # Errors
///
/// Returns a description of the problem if the room id is invalid.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("room id too long");
    }
    if room_id.starts_with('$') {
        return Err("room ids starting with '$' are reserved");
    }
    // Printable ASCII only
    if !room_id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("room id contains invalid characters");
    }
    Ok(())
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Capacity of the outbound status queue.
    pub output_capacity: usize,
    /// How long a routing task waits for queue space before dropping its status.
    pub emit_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            output_capacity: 8192,
            emit_timeout: Duration::from_millis(100),
        }
    }
}

/// The event router.
///
/// Cloning is cheap: clones share the same output queue.
#[derive(Debug, Clone)]
pub struct Router {
    output: mpsc::Sender<RoutingStatus>,
    emit_timeout: Duration,
}

impl Router {
    /// Create a router and the receiving end of its output queue.
    #[must_use]
    pub fn new(config: RouterConfig) -> (Self, mpsc::Receiver<RoutingStatus>) {
        info!("Creating router with config: {:?}", config);
        let (output, statuses) = mpsc::channel(config.output_capacity.max(1));
        let router = Self {
            output,
            emit_timeout: config.emit_timeout,
        };
        (router, statuses)
    }

    /// Decide the outcome for one frame received from `origin`.
    ///
    /// The returned status is always addressed to `origin`, the identity the
    /// frame's connection was registered with.
    #[must_use]
    pub fn evaluate(&self, origin: &str, frame: &[u8]) -> RoutingStatus {
        let started = Instant::now();

        let status = match codec::decode_event(frame) {
            Ok(decoded) => check(origin, &Event::ingest(decoded)),
            Err(e) => {
                debug!(user = %origin, error = %e, "Invalid packet");
                RoutingStatus::invalid_packet(origin, e)
            }
        };

        metrics::record_routing(started.elapsed());
        status
    }

    /// Evaluate a frame and emit its status.
    ///
    /// Waits up to the configured emit timeout for queue space. Returns
    /// whether the status was queued.
    pub async fn route(&self, origin: &str, frame: &[u8]) -> bool {
        let status = self.evaluate(origin, frame);

        match self.output.send_timeout(status, self.emit_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(status)) => {
                warn!(
                    user = %status.sender_id,
                    event = %status.event_id,
                    "Output queue full, dropping status"
                );
                metrics::record_dropped("queue_full");
                false
            }
            Err(SendTimeoutError::Closed(status)) => {
                debug!(event = %status.event_id, "Output queue closed, dropping status");
                metrics::record_dropped("closed");
                false
            }
        }
    }
}

fn check(origin: &str, event: &Event) -> RoutingStatus {
    if !event.kind.is_known() {
        debug!(user = %origin, kind = %event.kind, "Invalid event type");
        return RoutingStatus::invalid_event_type(origin, event);
    }

    if event.sender_id.is_empty() || event.sender_id != origin {
        debug!(user = %origin, claimed = %event.sender_id, "Sender mismatch");
        return RoutingStatus::invalid_sender(origin, event);
    }

    if let Err(why) = validate_room_id(&event.room_id) {
        debug!(user = %origin, room = %event.room_id, why, "Invalid room id");
        return RoutingStatus::invalid_room(origin, event, why);
    }

    trace!(user = %origin, event = %event.id(), room = %event.room_id, "Event accepted");
    RoutingStatus::sent(event)
}
