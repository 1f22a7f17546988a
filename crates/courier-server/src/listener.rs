//! WebSocket upgrade listener.
//!
//! Accepts TCP connections, performs the upgrade handshake off the async
//! workers, and hands upgraded connections to the hub. From then on the hub
//! owns them. Plain HTTP requests on the same port get a short text reply.

use crate::status::HELLO;
use anyhow::{Context, Result};
use courier_core::Hub;
use courier_transport::{upgrade, Connection, TransportError, UpgradeConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Largest request head inspected before the handshake.
const MAX_HEAD: usize = 8 * 1024;

/// Bind the upgrade listener.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))
}

/// Accept connections until the task is dropped.
pub async fn run(listener: TcpListener, hub: Arc<Hub>, config: UpgradeConfig) {
    let config = Arc::new(config);
    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket endpoint: ws://{}{}", addr, config.path);
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let hub = Arc::clone(&hub);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Err(e) = accept(stream, peer, hub, config).await {
                        debug!(%peer, error = %e, "Connection not accepted");
                    }
                });
            }
            Err(e) => warn!(error = %e, "Failed to accept connection"),
        }
    }
}

/// What a new connection asked for.
#[derive(Debug, PartialEq, Eq)]
enum Head {
    /// A WebSocket upgrade, or a head too large to tell.
    Upgrade,
    /// A plain HTTP request for `path`; `len` bytes of head were peeked.
    Plain { path: String, len: usize },
    /// The peer went away before sending anything.
    Closed,
}

/// Classify a request head without consuming it.
fn classify(head: &[u8]) -> Option<Head> {
    let end = head.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let text = String::from_utf8_lossy(&head[..end]);
    let mut lines = text.split("\r\n");

    let path = lines.next()?.split_whitespace().nth(1)?.to_owned();
    let upgrade = lines.any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
        })
    });

    Some(if upgrade {
        Head::Upgrade
    } else {
        Head::Plain { path, len: end }
    })
}

/// Peek until a complete request head has arrived.
async fn sniff(stream: &TcpStream) -> std::io::Result<Head> {
    let mut buf = vec![0u8; MAX_HEAD];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(Head::Closed);
        }
        if let Some(head) = classify(&buf[..n]) {
            return Ok(head);
        }
        if n == buf.len() {
            return Ok(Head::Upgrade);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Answer a plain HTTP request and close.
async fn respond(mut stream: TcpStream, path: &str, len: usize) -> Result<()> {
    let mut head = vec![0u8; len];
    stream.read_exact(&mut head).await?;

    let (status, body) = if path == "/" {
        ("200 OK", HELLO)
    } else {
        ("404 Not Found", "not found")
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Upgrade one stream and register it.
async fn accept(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    config: Arc<UpgradeConfig>,
) -> Result<()> {
    let head = tokio::time::timeout(config.handshake_timeout, sniff(&stream))
        .await
        .context("Timed out waiting for request")??;
    match head {
        Head::Upgrade => {}
        Head::Plain { path, len } => {
            debug!(%peer, %path, "Plain HTTP request");
            return respond(stream, &path, len).await;
        }
        Head::Closed => return Ok(()),
    }

    let stream = stream.into_std().context("Failed to detach stream")?;

    let upgraded = tokio::task::spawn_blocking(move || upgrade(stream, &config))
        .await
        .context("Upgrade task failed")?;

    let (user_id, conn) = match upgraded {
        Ok(upgraded) => upgraded,
        Err(TransportError::Rejected { status, reason }) => {
            debug!(%peer, status, %reason, "Upgrade rejected");
            return Ok(());
        }
        Err(e) => return Err(e).context("Upgrade failed"),
    };

    let conn: Arc<dyn Connection> = Arc::new(conn);
    if let Err(e) = hub.add_conn(user_id.clone(), Arc::clone(&conn)) {
        warn!(user = %user_id, %peer, error = %e, "Failed to register connection");
        conn.close();
        return Ok(());
    }

    debug!(user = %user_id, %peer, "Connection accepted");
    Ok(())
}
