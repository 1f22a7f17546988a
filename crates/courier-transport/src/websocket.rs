//! WebSocket transport implementation.
//!
//! Connections use the synchronous `tungstenite` API over a non-blocking
//! `TcpStream`: readiness comes from the hub's poller, so reads and writes
//! here must never wait on the network.

use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_tungstenite::tungstenite::{
    self,
    handshake::server::{ErrorResponse, Request, Response},
    handshake::HandshakeError,
    http::StatusCode,
    protocol::WebSocketConfig,
    Error as WsError, Message, WebSocket,
};
use tracing::{debug, trace, warn};

use crate::traits::{Connection, TransportError};

/// Query parameter carrying the connecting user's identity.
pub const USER_ID_PARAM: &str = "userId";

/// Header consulted when the query parameter is absent.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Upgrade configuration.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// The only request path accepted for upgrades.
    pub path: String,
    /// Read/write timeout while the handshake is in progress.
    pub handshake_timeout: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Outbound bytes a connection may buffer before writes fail.
    pub max_write_buffer: usize,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            handshake_timeout: Duration::from_secs(5),
            max_message_size: 64 * 1024, // 64 KB
            max_write_buffer: 1024 * 1024,
        }
    }
}

impl UpgradeConfig {
    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config.max_write_buffer_size = self.max_write_buffer.max(config.write_buffer_size + 1);
        config
    }
}

/// Perform the server side of a WebSocket upgrade on a freshly accepted stream.
///
/// The handshake is blocking (bounded by `handshake_timeout`). On success the
/// socket is switched to non-blocking mode and returned together with the
/// user identity taken from the request.
///
/// # Errors
///
/// Returns [`TransportError::Rejected`] if the path is wrong or no user id was
/// supplied, [`TransportError::Handshake`] if the handshake failed or timed
/// out, and [`TransportError::Io`] on socket setup failures.
pub fn upgrade(
    stream: TcpStream,
    config: &UpgradeConfig,
) -> Result<(String, WsConnection), TransportError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(config.handshake_timeout))?;
    stream.set_write_timeout(Some(config.handshake_timeout))?;

    let mut user_id = None;
    let mut rejection = None;
    let callback = |request: &Request, response: Response| match identify(request, &config.path) {
        Ok(id) => {
            user_id = Some(id);
            Ok(response)
        }
        Err((status, reason)) => {
            rejection = Some((status, reason.clone()));
            let mut refusal = ErrorResponse::new(Some(reason));
            *refusal.status_mut() = status;
            Err(refusal)
        }
    };

    let accepted =
        tungstenite::accept_hdr_with_config(stream, callback, Some(config.websocket_config()))
            .map_err(|e| match e {
                HandshakeError::Interrupted(_) => TransportError::Handshake("timed out".into()),
                HandshakeError::Failure(e) => TransportError::Handshake(e.to_string()),
            });

    if let Some((status, reason)) = rejection {
        return Err(TransportError::Rejected {
            status: status.as_u16(),
            reason,
        });
    }

    let socket = accepted?;

    let user_id = user_id.ok_or_else(|| TransportError::Handshake("no user identity".into()))?;
    let conn = WsConnection::from_socket(socket)?;

    debug!(user = %user_id, fd = conn.fd, "WebSocket handshake completed");
    Ok((user_id, conn))
}

/// Resolve the user identity of an upgrade request.
fn identify(request: &Request, path: &str) -> Result<String, (StatusCode, String)> {
    let uri = request.uri();
    if uri.path() != path {
        return Err((
            StatusCode::NOT_FOUND,
            format!("No WebSocket endpoint at {}", uri.path()),
        ));
    }

    let from_query = uri.query().and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == USER_ID_PARAM)
            .map(|(_, value)| value.into_owned())
    });

    let user_id = from_query.or_else(|| {
        request
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    });

    match user_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            format!("Missing {USER_ID_PARAM}"),
        )),
    }
}

/// A WebSocket connection driven by external readiness.
pub struct WsConnection {
    fd: RawFd,
    remote_addr: Option<SocketAddr>,
    socket: Mutex<WebSocket<TcpStream>>,
    is_open: AtomicBool,
}

impl WsConnection {
    /// Wrap an upgraded socket, switching it to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket options cannot be changed.
    pub fn from_socket(socket: WebSocket<TcpStream>) -> io::Result<Self> {
        let stream = socket.get_ref();
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        stream.set_nonblocking(true)?;

        Ok(Self {
            fd: stream.as_raw_fd(),
            remote_addr: stream.peer_addr().ok(),
            socket: Mutex::new(socket),
            is_open: AtomicBool::new(true),
        })
    }

    /// Flush the write buffer while holding the socket lock.
    fn flush_locked(&self, socket: &mut WebSocket<TcpStream>) -> Result<(), TransportError> {
        match socket.flush() {
            Ok(()) => Ok(()),
            Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                trace!(fd = self.fd, error = %e, "WebSocket flush failed");
                self.is_open.store(false, Ordering::SeqCst);
                Err(TransportError::SendFailed(e.to_string()))
            }
        }
    }
}

impl AsRawFd for WsConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Connection for WsConnection {
    fn read_frame(&self) -> Result<Option<Bytes>, TransportError> {
        let mut socket = self.socket.lock();

        // Push out anything a previous write left queued.
        self.flush_locked(&mut socket)?;

        loop {
            match socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(Bytes::from(text))),
                Ok(Message::Binary(data)) => return Ok(Some(Bytes::from(data))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    // Pongs are queued by tungstenite and flushed with later I/O.
                }
                Ok(Message::Close(frame)) => {
                    debug!(fd = self.fd, ?frame, "Received close frame");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                Err(e) => {
                    trace!(fd = self.fd, error = %e, "WebSocket read failed");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    fn write_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };

        let mut socket = self.socket.lock();
        match socket.send(message) {
            Ok(()) => Ok(()),
            Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(fd = self.fd, "Socket not writable, frame queued until writable");
                Ok(())
            }
            Err(e) => {
                self.is_open.store(false, Ordering::SeqCst);
                Err(TransportError::SendFailed(e.to_string()))
            }
        }
    }

    fn flush(&self) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let mut socket = self.socket.lock();
        self.flush_locked(&mut socket)
    }

    fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);

        let mut socket = self.socket.lock();
        let _ = socket.close(None);
        let _ = socket.flush();
        if let Err(e) = socket.get_ref().shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                warn!(fd = self.fd, error = %e, "Failed to shut down socket");
            }
        }
    }

    fn peer_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::{Events, Poller};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;

    type Client = WebSocket<TcpStream>;

    fn connect(
        request: impl IntoClientRequest,
    ) -> (Result<(String, WsConnection), TransportError>, Option<Client>) {
        connect_with(request, &UpgradeConfig::default())
    }

    fn connect_with(
        request: impl IntoClientRequest,
        config: &UpgradeConfig,
    ) -> (Result<(String, WsConnection), TransportError>, Option<Client>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let request = request.into_client_request().unwrap();

        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            tungstenite::client(request, stream).ok().map(|(ws, _)| ws)
        });

        let (stream, _) = listener.accept().unwrap();
        let server = upgrade(stream, config);
        (server, client.join().unwrap())
    }

    fn read_eventually(conn: &WsConnection) -> Result<Option<Bytes>, TransportError> {
        for _ in 0..200 {
            match conn.read_frame() {
                Ok(None) => thread::sleep(Duration::from_millis(5)),
                other => return other,
            }
        }
        Ok(None)
    }

    #[test]
    fn test_upgrade_config_default() {
        let config = UpgradeConfig::default();
        assert_eq!(config.path, "/ws");
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_upgrade_reads_user_from_query() {
        let (server, client) = connect("ws://localhost/ws?userId=alice");
        let (user, conn) = server.unwrap();

        assert_eq!(user, "alice");
        assert!(client.is_some());
        assert!(conn.is_open());
        assert!(conn.peer_addr().is_some());
        assert!(conn.as_raw_fd() >= 0);
    }

    #[test]
    fn test_upgrade_reads_user_from_header() {
        let mut request = "ws://localhost/ws".into_client_request().unwrap();
        request
            .headers_mut()
            .insert(USER_ID_HEADER, HeaderValue::from_static("bob"));

        let (server, _client) = connect(request);
        assert_eq!(server.unwrap().0, "bob");
    }

    #[test]
    fn test_upgrade_rejects_missing_user() {
        let (server, client) = connect("ws://localhost/ws");

        match server {
            Err(TransportError::Rejected { status, .. }) => assert_eq!(status, 401),
            Err(other) => panic!("Expected rejection, got {other:?}"),
            Ok(_) => panic!("Expected rejection"),
        }
        assert!(client.is_none());
    }

    #[test]
    fn test_upgrade_rejects_wrong_path() {
        let (server, _client) = connect("ws://localhost/other?userId=alice");

        match server {
            Err(TransportError::Rejected { status, .. }) => assert_eq!(status, 404),
            Err(other) => panic!("Expected rejection, got {other:?}"),
            Ok(_) => panic!("Expected rejection"),
        }
    }

    #[test]
    fn test_frames_flow_both_ways() {
        let (server, client) = connect("ws://localhost/ws?userId=alice");
        let (_, conn) = server.unwrap();
        let mut client = client.unwrap();

        assert!(conn.read_frame().unwrap().is_none());

        client.send(Message::Text("first".into())).unwrap();
        client.send(Message::Binary(b"second".to_vec())).unwrap();
        assert_eq!(read_eventually(&conn).unwrap().unwrap(), "first");
        assert_eq!(read_eventually(&conn).unwrap().unwrap(), "second");

        conn.write_frame(Bytes::from_static(b"{\"ok\":true}")).unwrap();
        match client.read().unwrap() {
            Message::Text(text) => assert_eq!(text, "{\"ok\":true}"),
            other => panic!("Expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_peer_close_is_an_error() {
        let (server, client) = connect("ws://localhost/ws?userId=alice");
        let (_, conn) = server.unwrap();
        drop(client);

        assert!(read_eventually(&conn).is_err());
        assert!(!conn.is_open());
        assert!(matches!(
            conn.write_frame(Bytes::from_static(b"late")),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (server, _client) = connect("ws://localhost/ws?userId=alice");
        let (_, conn) = server.unwrap();

        conn.close();
        conn.close();
        assert!(!conn.is_open());
    }

    #[test]
    fn test_queued_frames_flush_on_writable() {
        const FRAMES: usize = 512;
        let config = UpgradeConfig {
            max_write_buffer: 64 * 1024 * 1024,
            ..Default::default()
        };
        let (server, client) = connect_with("ws://localhost/ws?userId=alice", &config);
        let (_, conn) = server.unwrap();
        let mut client = client.unwrap();

        let poller = Poller::new().unwrap();
        poller.add(conn.as_raw_fd()).unwrap();

        // 16 MiB is more than the loopback socket buffers hold, so the tail
        // stays queued in the connection while the client is not reading.
        let frame = Bytes::from(vec![b'x'; 32 * 1024]);
        for _ in 0..FRAMES {
            conn.write_frame(frame.clone()).unwrap();
        }

        let reader = thread::spawn(move || {
            client
                .get_mut()
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            let mut received = 0;
            while received < FRAMES {
                match client.read() {
                    Ok(Message::Text(_)) => received += 1,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            received
        });

        let mut events = Events::with_capacity(4);
        let deadline = Instant::now() + Duration::from_secs(15);
        while !reader.is_finished() && Instant::now() < deadline {
            poller
                .wait(&mut events, Some(Duration::from_millis(50)))
                .unwrap();
            if events.iter().any(|ready| ready.writable) {
                conn.flush().unwrap();
            }
        }

        assert_eq!(reader.join().unwrap(), FRAMES);
    }

    #[test]
    fn test_flush_after_close_fails() {
        let (server, _client) = connect("ws://localhost/ws?userId=alice");
        let (_, conn) = server.unwrap();

        assert!(conn.flush().is_ok());
        conn.close();
        assert!(matches!(conn.flush(), Err(TransportError::ConnectionClosed)));
    }
}
