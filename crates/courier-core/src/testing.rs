//! In-memory connections for unit tests.

use bytes::Bytes;
use courier_transport::{Connection, TransportError};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A connection over one end of a Unix socket pair.
///
/// Whatever bytes are available on a read come back as one frame, and
/// written frames are recorded instead of hitting the socket.
pub(crate) struct TestConn {
    stream: UnixStream,
    flood: Option<Bytes>,
    open: AtomicBool,
    fail_writes: AtomicBool,
    written: Mutex<Vec<Bytes>>,
}

impl TestConn {
    /// Create a connection and the peer end of its socket.
    pub(crate) fn pair() -> (Arc<Self>, UnixStream) {
        Self::build(None)
    }

    /// Create a connection that always has another `frame` to read.
    pub(crate) fn flooding(frame: Bytes) -> (Arc<Self>, UnixStream) {
        Self::build(Some(frame))
    }

    fn build(flood: Option<Bytes>) -> (Arc<Self>, UnixStream) {
        let (local, remote) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        let conn = Arc::new(Self {
            stream: local,
            flood,
            open: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
        });
        (conn, remote)
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }
}

impl AsRawFd for TestConn {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Connection for TestConn {
    fn read_frame(&self) -> Result<Option<Bytes>, TransportError> {
        if let Some(frame) = &self.flood {
            if !self.is_open() {
                return Err(TransportError::ConnectionClosed);
            }
            return Ok(Some(frame.clone()));
        }

        let mut buf = [0u8; 4096];
        match (&self.stream).read(&mut buf) {
            Ok(0) => {
                self.open.store(false, Ordering::SeqCst);
                Err(TransportError::ConnectionClosed)
            }
            Ok(n) => Ok(Some(Bytes::copy_from_slice(&buf[..n]))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        self.written.lock().push(frame);
        Ok(())
    }

    fn flush(&self) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
