//! Hub presence heartbeat.
//!
//! While the hub runs it announces itself to a [`PresenceStore`] once per
//! interval. On stop it withdraws the announcement once and ends. Beats are a
//! liveness signal: a failed beat is logged and the next tick tries again.

use crate::error::HeartbeatError;
use crate::metrics;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Presence key for a hub.
#[must_use]
pub fn presence_key(hub_id: Uuid) -> String {
    format!("reg:{hub_id}")
}

/// One presence announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat {
    /// The announcing hub.
    pub hub_id: Uuid,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl Beat {
    /// A beat for `hub_id` stamped with the current time.
    #[must_use]
    pub fn now(hub_id: Uuid) -> Self {
        Self {
            hub_id,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// The presence key this beat is stored under.
    #[must_use]
    pub fn key(&self) -> String {
        presence_key(self.hub_id)
    }
}

/// Heartbeat lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Beating on every interval tick.
    Running,
    /// Not started yet, or stopped for good.
    Stopped,
}

/// Where presence beats are recorded.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record a beat.
    async fn set(&self, beat: &Beat) -> Result<(), HeartbeatError>;

    /// Withdraw the hub's presence.
    async fn unset(&self, hub_id: Uuid) -> Result<(), HeartbeatError>;
}

/// A presence store that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresence;

#[async_trait]
impl PresenceStore for LogPresence {
    async fn set(&self, beat: &Beat) -> Result<(), HeartbeatError> {
        debug!(key = %beat.key(), timestamp = beat.timestamp, "Presence beat");
        Ok(())
    }

    async fn unset(&self, hub_id: Uuid) -> Result<(), HeartbeatError> {
        info!(key = %presence_key(hub_id), "Presence withdrawn");
        Ok(())
    }
}

/// Periodic presence announcer for one hub.
pub struct HeartbeatRegistry {
    hub_id: Uuid,
    interval: Duration,
    store: Arc<dyn PresenceStore>,
    state: Arc<Mutex<HeartbeatState>>,
}

impl HeartbeatRegistry {
    /// Create a stopped heartbeat.
    #[must_use]
    pub fn new(hub_id: Uuid, interval: Duration, store: Arc<dyn PresenceStore>) -> Self {
        Self {
            hub_id,
            interval: interval.max(Duration::from_millis(1)),
            store,
            state: Arc::new(Mutex::new(HeartbeatState::Stopped)),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        *self.state.lock()
    }

    /// Start beating on the current runtime until `stop` turns true or its
    /// sender is dropped.
    ///
    /// The first beat happens one interval after the call.
    pub fn spawn(&self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        *self.state.lock() = HeartbeatState::Running;

        let hub_id = self.hub_id;
        let interval = self.interval;
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(hub = %hub_id, ?interval, "Heartbeat started");

            loop {
                if *stop.borrow_and_update() {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        let beat = Beat::now(hub_id);
                        match store.set(&beat).await {
                            Ok(()) => metrics::record_heartbeat(),
                            Err(e) => warn!(hub = %hub_id, error = %e, "Heartbeat failed"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            if let Err(e) = store.unset(hub_id).await {
                warn!(hub = %hub_id, error = %e, "Failed to withdraw presence");
            }
            *state.lock() = HeartbeatState::Stopped;
            info!(hub = %hub_id, "Heartbeat stopped");
        })
    }
}
