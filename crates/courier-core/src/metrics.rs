//! Metric names and recording helpers.
//!
//! Everything goes through the `metrics` facade. Without an installed
//! recorder (tests, embedding) the calls are no-ops; the server binary
//! installs the Prometheus exporter.

use courier_protocol::StatusCode;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const FRAMES_INBOUND: &str = "courier_frames_inbound_total";
    pub const STATUSES_OUTBOUND: &str = "courier_statuses_outbound_total";
    pub const STATUSES_DROPPED: &str = "courier_statuses_dropped_total";
    pub const ROUTING_SECONDS: &str = "courier_routing_seconds";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
    pub const HEARTBEATS_TOTAL: &str = "courier_heartbeats_total";
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_counter!(names::FRAMES_INBOUND, "Frames read from clients");
    metrics::describe_counter!(
        names::STATUSES_OUTBOUND,
        "Routing statuses written to clients, by status code"
    );
    metrics::describe_counter!(
        names::STATUSES_DROPPED,
        "Routing statuses dropped before delivery, by reason"
    );
    metrics::describe_histogram!(
        names::ROUTING_SECONDS,
        "Time to evaluate one inbound frame in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors, by kind");
    metrics::describe_counter!(names::HEARTBEATS_TOTAL, "Presence beats emitted");
}

/// Record a newly registered connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
}

/// Update the registered connection count.
pub fn set_active_connections(count: usize) {
    gauge!(names::CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record an inbound frame.
pub fn record_frame() {
    counter!(names::FRAMES_INBOUND).increment(1);
}

/// Record a status written to a client.
pub fn record_status(code: StatusCode) {
    counter!(names::STATUSES_OUTBOUND, "code" => code.label()).increment(1);
}

/// Record a status that never reached a client.
pub fn record_dropped(reason: &'static str) {
    counter!(names::STATUSES_DROPPED, "reason" => reason).increment(1);
}

/// Record how long one routing decision took.
pub fn record_routing(elapsed: Duration) {
    histogram!(names::ROUTING_SECONDS).record(elapsed.as_secs_f64());
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Record a presence beat.
pub fn record_heartbeat() {
    counter!(names::HEARTBEATS_TOTAL).increment(1);
}
