//! The hub: composition of registry, router, pumps and heartbeat.

use crate::delivery;
use crate::error::HubError;
use crate::heartbeat::{HeartbeatRegistry, HeartbeatState, PresenceStore};
use crate::mux::MuxLoop;
use crate::registry::Registry;
use crate::router::{Router, RouterConfig};
use courier_protocol::RoutingStatus;
use courier_transport::Connection;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Name of the multiplexer thread.
pub const MUX_THREAD_NAME: &str = "courier-mux";

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum registered connections.
    pub max_connections: usize,
    /// Maximum readiness events handled per wait.
    pub wait_batch: usize,
    /// How long one wait blocks before the stop signal is checked again.
    pub wait_timeout: Duration,
    /// Maximum routing tasks in flight.
    pub route_concurrency: usize,
    /// Presence beat interval.
    pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1_000_000,
            wait_batch: 100,
            wait_timeout: Duration::from_millis(250),
            route_concurrency: 4096,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// A running delivery hub.
///
/// Connections are handed in with [`Hub::add_conn`] after their upgrade and
/// leave on their own when a read or write fails.
pub struct Hub {
    id: Uuid,
    config: HubConfig,
    registry: Arc<Registry>,
    router: Router,
    statuses: Mutex<Option<mpsc::Receiver<RoutingStatus>>>,
    heartbeat: HeartbeatRegistry,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
}

impl Hub {
    /// Build a hub. Nothing runs until [`Hub::start`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Poller`] if the readiness notifier cannot be created.
    pub fn new(
        config: HubConfig,
        router_config: RouterConfig,
        presence: Arc<dyn PresenceStore>,
    ) -> Result<Self, HubError> {
        let id = Uuid::new_v4();
        let registry = Arc::new(Registry::new(config.max_connections)?);
        let (router, statuses) = Router::new(router_config);
        let heartbeat = HeartbeatRegistry::new(id, config.heartbeat_interval, presence);
        let (stop, _) = watch::channel(false);

        info!(hub = %id, "Creating hub with config: {:?}", config);

        Ok(Self {
            id,
            config,
            registry,
            router,
            statuses: Mutex::new(Some(statuses)),
            heartbeat,
            heartbeat_task: Mutex::new(None),
            stop,
        })
    }

    /// The hub's identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Current heartbeat state.
    #[must_use]
    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.state()
    }

    /// Register an upgraded connection for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns the registry error; the caller owns `conn` and should close it.
    pub fn add_conn(
        &self,
        user_id: impl Into<String>,
        conn: Arc<dyn Connection>,
    ) -> Result<(), HubError> {
        let user_id = user_id.into();
        let peer = conn.peer_addr();

        self.registry.add(user_id.clone(), conn)?;

        debug!(
            user = %user_id,
            peer = peer.as_deref().unwrap_or("unknown"),
            connections = self.registry.len(),
            "Connection registered"
        );
        Ok(())
    }

    /// Remove a connection. It is not closed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Deregister`] if the kernel call failed. The
    /// connection is no longer registered either way.
    pub fn remove_conn(&self, conn: &dyn Connection) -> Result<(), HubError> {
        if self.registry.remove(conn)? {
            debug!(connections = self.registry.len(), "Connection removed");
        }
        Ok(())
    }

    /// Start the multiplexer thread, the delivery pump and the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NoRuntime`] outside a tokio runtime,
    /// [`HubError::AlreadyStarted`] on a second call, and [`HubError::Spawn`]
    /// if the multiplexer thread cannot be created.
    pub fn start(&self) -> Result<(), HubError> {
        self.launch(|mux| {
            thread::Builder::new()
                .name(MUX_THREAD_NAME.to_string())
                .spawn(move || mux.run())
                .map(drop)
        })
    }

    /// Start with `spawn` running the multiplexer loop. Nothing is consumed
    /// unless it succeeds, so a failed start can be retried.
    fn launch(
        &self,
        spawn: impl FnOnce(MuxLoop) -> io::Result<()>,
    ) -> Result<(), HubError> {
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let mut statuses = self.statuses.lock();
        if statuses.is_none() {
            return Err(HubError::AlreadyStarted);
        }

        let mux = MuxLoop {
            registry: Arc::clone(&self.registry),
            router: self.router.clone(),
            permits: Arc::new(Semaphore::new(self.config.route_concurrency.max(1))),
            runtime: runtime.clone(),
            stop: self.stop.subscribe(),
            batch: self.config.wait_batch,
            wait_timeout: self.config.wait_timeout,
        };
        spawn(mux).map_err(HubError::Spawn)?;

        if let Some(statuses) = statuses.take() {
            runtime.spawn(delivery::run(Arc::clone(&self.registry), statuses));
        }

        let _guard = runtime.enter();
        let task = self.heartbeat.spawn(self.stop.subscribe());
        *self.heartbeat_task.lock() = Some(task);

        info!(hub = %self.id, "Hub started");
        Ok(())
    }

    /// Signal the multiplexer loop and the heartbeat to stop.
    ///
    /// The delivery pump keeps draining queued statuses.
    pub fn stop(&self) {
        self.stop.send_replace(true);
        info!(hub = %self.id, "Hub stopping");
    }

    /// Stop, wait for the heartbeat to withdraw presence, then give in-flight
    /// routing and writes `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop();

        let task = self.heartbeat_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        info!(hub = %self.id, ?grace, "Waiting for in-flight work");
        tokio::time::sleep(grace).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::LogPresence;
    use crate::testing::TestConn;

    fn hub() -> Hub {
        Hub::new(
            HubConfig {
                max_connections: 4,
                wait_timeout: Duration::from_millis(20),
                ..Default::default()
            },
            RouterConfig::default(),
            Arc::new(LogPresence),
        )
        .unwrap()
    }

    #[test]
    fn test_hub_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.wait_batch, 100);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_start_outside_runtime() {
        let hub = hub();
        assert!(matches!(hub.start(), Err(HubError::NoRuntime)));
    }

    #[test]
    fn test_add_remove_conn() {
        let hub = hub();
        let (conn, _peer) = TestConn::pair();

        hub.add_conn("alice", conn.clone()).unwrap();
        assert_eq!(hub.connection_count(), 1);

        hub.remove_conn(conn.as_ref()).unwrap();
        assert_eq!(hub.connection_count(), 0);
        assert!(conn.is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_twice() {
        let hub = hub();

        hub.start().unwrap();
        assert!(matches!(hub.start(), Err(HubError::AlreadyStarted)));
        assert_eq!(hub.heartbeat_state(), HeartbeatState::Running);

        hub.shutdown(Duration::from_millis(10)).await;
        assert_eq!(hub.heartbeat_state(), HeartbeatState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_spawn_can_be_retried() {
        let hub = hub();

        let failed = hub.launch(|_| Err(io::Error::new(io::ErrorKind::Other, "no threads")));
        assert!(matches!(failed, Err(HubError::Spawn(_))));
        assert_eq!(hub.heartbeat_state(), HeartbeatState::Stopped);

        hub.start().unwrap();
        assert_eq!(hub.heartbeat_state(), HeartbeatState::Running);
        hub.shutdown(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_distinct_ids() {
        assert_ne!(hub().id(), hub().id());
    }
}
