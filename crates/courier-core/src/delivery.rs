//! Delivery pump (write pump).
//!
//! A single task drains the router's output queue in order and writes each
//! status to the connection of the user it is addressed to. One writer keeps
//! frames on any given socket in emission order.

use crate::metrics;
use crate::registry::Registry;
use courier_protocol::{codec, RoutingStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Drain `statuses` until every router handle is gone.
pub(crate) async fn run(registry: Arc<Registry>, mut statuses: mpsc::Receiver<RoutingStatus>) {
    info!("Delivery pump started");

    while let Some(status) = statuses.recv().await {
        deliver(&registry, &status);
    }

    info!("Delivery pump stopped");
}

/// Write one status. Best effort: nothing is retried.
pub(crate) fn deliver(registry: &Registry, status: &RoutingStatus) -> bool {
    let Some(conn) = registry.lookup(&status.sender_id) else {
        debug!(
            user = %status.sender_id,
            event = %status.event_id,
            "Recipient not connected, dropping status"
        );
        metrics::record_dropped("not_connected");
        return false;
    };

    let frame = match codec::encode_status(status) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(event = %status.event_id, error = %e, "Failed to encode status");
            metrics::record_error("encode");
            return false;
        }
    };

    match conn.write_frame(frame) {
        Ok(()) => {
            trace!(user = %status.sender_id, code = ?status.status_code, "Status delivered");
            metrics::record_status(status.status_code);
            true
        }
        Err(e) => {
            debug!(user = %status.sender_id, error = %e, "Write failed, evicting connection");
            metrics::record_error("write");
            registry.evict(&status.sender_id, conn.as_ref());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestConn;
    use courier_protocol::StatusCode;
    use courier_transport::Connection;
    use uuid::Uuid;

    fn status_for(user: &str) -> RoutingStatus {
        RoutingStatus::invalid_packet(user, "expected value")
    }

    #[test]
    fn test_deliver_writes_json() {
        let registry = Registry::new(16).unwrap();
        let (alice, _peer) = TestConn::pair();
        registry.add("alice", alice.clone()).unwrap();

        let status = status_for("alice");
        assert!(deliver(&registry, &status));

        let written = alice.written();
        assert_eq!(written.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&written[0]).unwrap();
        assert_eq!(json["senderId"], "alice");
        assert_eq!(json["statusCode"], 90001);
        assert_eq!(json["eventId"], status.event_id.to_string());
    }

    #[test]
    fn test_deliver_to_missing_user_is_dropped() {
        let registry = Registry::new(16).unwrap();
        let (alice, _peer) = TestConn::pair();
        registry.add("alice", alice.clone()).unwrap();

        assert!(!deliver(&registry, &status_for("bob")));
        assert!(alice.written().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_write_failure_evicts() {
        let registry = Registry::new(16).unwrap();
        let (alice, _peer) = TestConn::pair();
        registry.add("alice", alice.clone()).unwrap();
        alice.fail_writes();

        assert!(!deliver(&registry, &status_for("alice")));
        assert!(registry.is_empty());
        assert!(!alice.is_open());
    }

    #[tokio::test]
    async fn test_run_preserves_order() {
        let registry = Arc::new(Registry::new(16).unwrap());
        let (alice, _peer) = TestConn::pair();
        registry.add("alice", alice.clone()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let ids: Vec<Uuid> = (0..5)
            .map(|_| {
                let status = status_for("alice");
                let id = status.event_id;
                tx.try_send(status).unwrap();
                id
            })
            .collect();
        drop(tx);

        run(Arc::clone(&registry), rx).await;

        let delivered: Vec<Uuid> = alice
            .written()
            .iter()
            .map(|frame| {
                let status: RoutingStatus = serde_json::from_slice(frame).unwrap();
                assert_eq!(status.status_code, StatusCode::InvalidPacket);
                status.event_id
            })
            .collect();
        assert_eq!(delivered, ids);
    }
}
