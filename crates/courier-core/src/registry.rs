//! Connection registry.
//!
//! The registry is the authoritative set of live connections. It pairs every
//! connection with the user identity it was upgraded with and keeps the
//! kernel readiness registration in step with its own maps: both are only
//! mutated while holding the write half of a single lock, so a concurrent
//! [`Registry::wait`] never sees one without the other.
//!
//! Readiness is edge-triggered. Connections that may hold input the kernel
//! will not report again (fresh upgrades, and connections whose read was
//! cut short) sit in a backlog that the next wait returns without blocking.

use crate::error::HubError;
use crate::metrics;
use courier_transport::{Connection, Events, Poller};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A connection reported ready by [`Registry::wait`].
pub struct Ready {
    /// The identity the connection was registered with.
    pub user_id: String,
    /// The connection.
    pub conn: Arc<dyn Connection>,
    /// Frames may be waiting to be read.
    pub readable: bool,
    /// Queued output can be flushed.
    pub writable: bool,
}

struct Entry {
    user_id: String,
    conn: Arc<dyn Connection>,
}

#[derive(Default)]
struct Maps {
    by_fd: HashMap<RawFd, Entry>,
    by_user: HashMap<String, RawFd>,
}

/// The connection registry.
pub struct Registry {
    poller: Poller,
    maps: RwLock<Maps>,
    backlog: Mutex<HashSet<RawFd>>,
    max_connections: usize,
}

impl Registry {
    /// Create an empty registry with its own readiness notifier.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Poller`] if the notifier cannot be created.
    pub fn new(max_connections: usize) -> Result<Self, HubError> {
        let poller = Poller::new().map_err(HubError::Poller)?;
        Ok(Self {
            poller,
            maps: RwLock::new(Maps::default()),
            backlog: Mutex::new(HashSet::new()),
            max_connections,
        })
    }

    /// Register `conn` under `user_id`.
    ///
    /// A user holds at most one connection: if `user_id` is already
    /// connected, the previous connection is deregistered and closed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::CapacityReached`] when the registry is full and
    /// [`HubError::Register`] when the kernel refuses the registration. In
    /// both cases nothing is changed.
    pub fn add(
        &self,
        user_id: impl Into<String>,
        conn: Arc<dyn Connection>,
    ) -> Result<(), HubError> {
        let user_id = user_id.into();
        let fd = conn.as_raw_fd();

        let replaced = {
            let mut maps = self.maps.write();
            let reconnect = maps.by_user.contains_key(&user_id);
            if !reconnect && maps.by_fd.len() >= self.max_connections {
                return Err(HubError::CapacityReached(self.max_connections));
            }

            self.poller
                .add(fd)
                .map_err(|source| HubError::Register { fd, source })?;

            let replaced = match maps.by_user.insert(user_id.clone(), fd) {
                Some(previous) if previous != fd => {
                    if let Err(e) = self.poller.delete(previous) {
                        warn!(
                            user = %user_id,
                            fd = previous,
                            error = %e,
                            "Failed to deregister replaced connection"
                        );
                    }
                    maps.by_fd.remove(&previous).map(|entry| entry.conn)
                }
                _ => None,
            };
            maps.by_fd.insert(
                fd,
                Entry {
                    user_id: user_id.clone(),
                    conn,
                },
            );

            metrics::record_connection();
            metrics::set_active_connections(maps.by_fd.len());
            replaced
        };

        if let Some(previous) = replaced {
            debug!(
                user = %user_id,
                previous = previous.as_raw_fd(),
                fd,
                "User reconnected, closing previous connection"
            );
            previous.close();
        }

        // Input may already be buffered from the handshake.
        self.backlog.lock().insert(fd);
        if let Err(e) = self.poller.wake() {
            warn!(error = %e, "Failed to wake readiness wait");
        }
        Ok(())
    }

    /// Remove `conn` from the registry.
    ///
    /// Returns `Ok(false)` if the connection was not registered. The entry is
    /// gone even when deregistration fails; callers should release the
    /// connection either way.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Deregister`] if the kernel call failed.
    pub fn remove(&self, conn: &dyn Connection) -> Result<bool, HubError> {
        let fd = conn.as_raw_fd();

        let mut maps = self.maps.write();
        let Some(entry) = maps.by_fd.remove(&fd) else {
            return Ok(false);
        };

        let deregistered = self.poller.delete(fd);

        if maps.by_user.get(&entry.user_id) == Some(&fd) {
            maps.by_user.remove(&entry.user_id);
        }
        metrics::set_active_connections(maps.by_fd.len());

        deregistered.map_err(|source| HubError::Deregister { fd, source })?;
        Ok(true)
    }

    /// Remove a failed connection and close it.
    pub(crate) fn evict(&self, user_id: &str, conn: &dyn Connection) {
        match self.remove(conn) {
            Ok(true) => debug!(user = %user_id, fd = conn.as_raw_fd(), "Connection evicted"),
            Ok(false) => trace!(user = %user_id, "Connection already evicted"),
            Err(e) => {
                warn!(user = %user_id, error = %e, "Failed to deregister connection");
                metrics::record_error("deregister");
            }
        }
        conn.close();
    }

    /// Return `conn` from the next [`Registry::wait`] without waiting for
    /// new readiness.
    pub(crate) fn defer(&self, conn: &dyn Connection) {
        self.backlog.lock().insert(conn.as_raw_fd());
    }

    /// Block until registered connections are ready.
    ///
    /// At most `events.capacity()` kernel events are taken per call, plus any
    /// backlog; a non-empty backlog makes the wait return immediately. The
    /// wait itself holds no lock, and a connection removed while it was in
    /// progress is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Wait`] if the kernel call failed.
    pub fn wait(
        &self,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<Vec<Ready>, HubError> {
        let timeout = if self.backlog.lock().is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        self.poller.wait(events, timeout).map_err(HubError::Wait)?;
        let backlog = std::mem::take(&mut *self.backlog.lock());

        let maps = self.maps.read();
        let mut ready: Vec<Ready> = Vec::with_capacity(events.capacity() + backlog.len());
        let mut index: HashMap<RawFd, usize> = HashMap::new();

        let deferred = backlog.into_iter().map(|fd| (fd, true, false));
        let reported = events.iter().map(|r| (r.fd, r.readable, r.writable));
        for (fd, readable, writable) in reported.chain(deferred) {
            if let Some(&i) = index.get(&fd) {
                ready[i].readable |= readable;
                ready[i].writable |= writable;
                continue;
            }
            let Some(entry) = maps.by_fd.get(&fd) else {
                trace!(fd, "Ready fd no longer registered");
                continue;
            };
            index.insert(fd, ready.len());
            ready.push(Ready {
                user_id: entry.user_id.clone(),
                conn: Arc::clone(&entry.conn),
                readable,
                writable,
            });
        }
        Ok(ready)
    }

    /// Find the current connection of `user_id`.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<Arc<dyn Connection>> {
        let maps = self.maps.read();
        let fd = maps.by_user.get(user_id)?;
        maps.by_fd.get(fd).map(|entry| Arc::clone(&entry.conn))
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.read().by_fd.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.read().by_fd.is_empty()
    }
}
