//! Readiness multiplexer loop (read pump).

use crate::metrics;
use crate::registry::{Ready, Registry};
use crate::router::Router;
use bytes::Bytes;
use courier_transport::{Connection, Events};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore, TryAcquireError};
use tracing::{debug, info, trace, warn};

/// Reads frames from every ready connection and hands them to routing tasks.
///
/// Runs on a dedicated OS thread since the readiness wait blocks.
pub(crate) struct MuxLoop {
    pub(crate) registry: Arc<Registry>,
    pub(crate) router: Router,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) runtime: Handle,
    pub(crate) stop: watch::Receiver<bool>,
    /// Readiness events per wait, and frames read per connection per wakeup.
    pub(crate) batch: usize,
    pub(crate) wait_timeout: Duration,
}

impl MuxLoop {
    /// Run until the stop signal is set or its sender is gone.
    pub(crate) fn run(self) {
        let mut events = Events::with_capacity(self.batch);
        info!(batch = self.batch, "Multiplexer loop started");

        while !self.stopped() {
            match self.registry.wait(&mut events, Some(self.wait_timeout)) {
                Ok(ready) => {
                    for ready in ready {
                        self.service(ready);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Readiness wait failed");
                    metrics::record_error("wait");
                }
            }
        }

        info!("Multiplexer loop stopped");
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    fn service(&self, ready: Ready) {
        let Ready {
            user_id,
            conn,
            readable,
            writable,
        } = ready;

        if writable {
            if let Err(e) = conn.flush() {
                debug!(user = %user_id, error = %e, "Flush failed, evicting connection");
                metrics::record_error("write");
                self.registry.evict(&user_id, conn.as_ref());
                return;
            }
        }
        if readable {
            self.drain(&user_id, &conn);
        }
    }

    /// Read the connection's frames until it would block.
    ///
    /// Readiness is edge-triggered, so stopping early would lose the rest
    /// until more data arrives. After `batch` frames the connection is
    /// deferred instead and read again after the other ready connections.
    fn drain(&self, user_id: &str, conn: &Arc<dyn Connection>) {
        for _ in 0..self.batch.max(1) {
            match conn.read_frame() {
                Ok(Some(frame)) => self.dispatch(user_id, frame),
                Ok(None) => return,
                Err(e) => {
                    debug!(user = %user_id, error = %e, "Read failed, evicting connection");
                    self.registry.evict(user_id, conn.as_ref());
                    return;
                }
            }
        }
        trace!(user = %user_id, "Read budget spent, deferring connection");
        self.registry.defer(conn.as_ref());
    }

    /// Spawn a routing task for one frame, waiting for a permit if too many
    /// are in flight.
    fn dispatch(&self, user_id: &str, frame: Bytes) {
        metrics::record_frame();

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                trace!("Routing saturated, delaying reads");
                match self
                    .runtime
                    .block_on(Arc::clone(&self.permits).acquire_owned())
                {
                    Ok(permit) => permit,
                    Err(_) => return,
                }
            }
            Err(TryAcquireError::Closed) => return,
        };

        let router = self.router.clone();
        let user_id = user_id.to_owned();
        self.runtime.spawn(async move {
            router.route(&user_id, &frame).await;
            drop(permit);
        });
    }
}
