//! Kernel readiness notification.
//!
//! One [`Poller`] watches every connection the hub holds, built on
//! [`mio::Poll`] (epoll on Linux). Registrations are edge-triggered for both
//! readable and writable readiness, so a consumer must read until the socket
//! would block and flush queued output when writable readiness arrives.
//!
//! Each registration is keyed by the connection's file descriptor. A
//! [`mio::Waker`] lets other threads interrupt a blocked [`Poller::wait`].

use mio::unix::SourceFd;
use mio::{Interest, Token, Waker};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Token reserved for the waker; descriptors never reach it.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Readiness of one registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// The registered descriptor.
    pub fd: RawFd,
    /// Data, a hang-up or an error is pending.
    pub readable: bool,
    /// Buffer space became available for writing.
    pub writable: bool,
}

/// A shared readiness notifier.
///
/// Registration goes through a cloned [`mio::Registry`] and never contends
/// with a blocked wait.
pub struct Poller {
    poll: Mutex<mio::Poll>,
    registry: mio::Registry,
    waker: Waker,
}

impl Poller {
    /// Create a new notifier.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the notifier cannot be created.
    pub fn new() -> io::Result<Self> {
        let poll = mio::Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll: Mutex::new(poll),
            registry,
            waker,
        })
    }

    /// Watch `fd` for readable and writable readiness.
    ///
    /// # Errors
    ///
    /// Returns the OS error, e.g. `EEXIST` if `fd` is already registered or
    /// `ENOSPC` when the per-user watch limit is reached.
    pub fn add(&self, fd: RawFd) -> io::Result<()> {
        self.registry.register(
            &mut SourceFd(&fd),
            token(fd),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    /// Stop watching `fd`.
    ///
    /// # Errors
    ///
    /// Returns the OS error, e.g. `ENOENT` if `fd` is not registered.
    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.registry.deregister(&mut SourceFd(&fd))
    }

    /// Interrupt the current or next [`Poller::wait`].
    ///
    /// # Errors
    ///
    /// Returns the OS error if the wake-up could not be signalled.
    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    /// Block until a registered descriptor is ready, [`Poller::wake`] is
    /// called, or `timeout` elapses (`None` waits forever).
    ///
    /// Returns the number of descriptor readiness events, at most
    /// `events.capacity()`. An interrupted wait reports zero.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the wait fails.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let mut poll = self.poll.lock();
        match poll.poll(&mut events.inner, timeout) {
            Ok(()) => Ok(events.len()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                events.inner.clear();
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller").finish_non_exhaustive()
    }
}

fn token(fd: RawFd) -> Token {
    Token(fd as usize)
}

/// A reusable buffer of readiness events.
pub struct Events {
    inner: mio::Events,
}

impl Events {
    /// Create a buffer that holds up to `capacity` events per wait.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: mio::Events::with_capacity(capacity.max(1)),
        }
    }

    /// Maximum events returned by one wait.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Number of descriptor events from the last wait.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether the last wait returned no descriptor events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Descriptors reported ready by the last wait. Wake-ups are skipped.
    pub fn iter(&self) -> impl Iterator<Item = Readiness> + '_ {
        self.inner
            .iter()
            .filter(|event| event.token() != WAKE_TOKEN)
            .map(|event| Readiness {
                fd: event.token().0 as RawFd,
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable(),
            })
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn readable_fds(events: &Events) -> Vec<RawFd> {
        events.iter().filter(|r| r.readable).map(|r| r.fd).collect()
    }

    #[test]
    fn test_wait_reports_readable_fd() {
        let poller = Poller::new().unwrap();
        let (local, mut remote) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        poller.add(local.as_raw_fd()).unwrap();

        // The fresh socket is writable but has nothing to read.
        let mut events = Events::with_capacity(8);
        poller
            .wait(&mut events, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(readable_fds(&events).is_empty());

        remote.write_all(b"ping").unwrap();
        let n = poller.wait(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(n, 1);
        assert_eq!(readable_fds(&events), vec![local.as_raw_fd()]);
    }

    #[test]
    fn test_wait_reports_hangup() {
        let poller = Poller::new().unwrap();
        let (local, remote) = UnixStream::pair().unwrap();
        poller.add(local.as_raw_fd()).unwrap();

        drop(remote);
        let mut events = Events::with_capacity(4);
        poller.wait(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(readable_fds(&events), vec![local.as_raw_fd()]);
    }

    #[test]
    fn test_registration_reports_writable() {
        let poller = Poller::new().unwrap();
        let (local, _remote) = UnixStream::pair().unwrap();
        poller.add(local.as_raw_fd()).unwrap();

        let mut events = Events::with_capacity(4);
        poller.wait(&mut events, Some(Duration::from_secs(1))).unwrap();
        let ready: Vec<_> = events.iter().collect();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].writable);
    }

    #[test]
    fn test_add_delete_roundtrip() {
        let poller = Poller::new().unwrap();
        let (local, _remote) = UnixStream::pair().unwrap();
        let fd = local.as_raw_fd();

        poller.add(fd).unwrap();
        assert_eq!(
            poller.add(fd).unwrap_err().raw_os_error(),
            Some(libc::EEXIST)
        );

        poller.delete(fd).unwrap();
        assert_eq!(
            poller.delete(fd).unwrap_err().raw_os_error(),
            Some(libc::ENOENT)
        );

        // Re-registering after removal works again.
        poller.add(fd).unwrap();
    }

    #[test]
    fn test_batch_is_bounded() {
        let poller = Poller::new().unwrap();
        let mut pairs = Vec::new();
        for _ in 0..5 {
            let (local, mut remote) = UnixStream::pair().unwrap();
            poller.add(local.as_raw_fd()).unwrap();
            remote.write_all(b"x").unwrap();
            pairs.push((local, remote));
        }

        let mut events = Events::with_capacity(3);
        let n = poller.wait(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(n, 3);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let poller = Arc::new(Poller::new().unwrap());

        let waker = Arc::clone(&poller);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.wake().unwrap();
        });

        let started = Instant::now();
        let mut events = Events::with_capacity(4);
        let n = poller.wait(&mut events, Some(Duration::from_secs(10))).unwrap();
        assert_eq!(n, 0);
        assert!(events.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
