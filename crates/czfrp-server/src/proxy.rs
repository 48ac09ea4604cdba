//! Public HTTP listener: reads the request head, demultiplexes on the
//! `Host:` header, and hands matched connections to the rendezvous engine.
//!
//! Only the Host header is ever inspected. Everything read here, the
//! header terminator included, is carried along as the replayable head so
//! the backend sees an intact request.

use crate::registry::Registry;
use crate::rendezvous;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Literal response for hosts with no tunnel behind them.
const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 26\r\n\r\nCZ7 Host: Tunnel Not Found";

/// End-of-head marker for an HTTP/1.1 request.
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Limits applied while reading a request head, overridable in tests.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Cap on buffered head bytes before the connection is dropped.
    pub max_head_bytes: usize,
    /// How long a public connection may take to produce a full head.
    pub head_timeout: Duration,
    /// TTL for the rendezvous entry created from a matched connection.
    pub pending_ttl: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            max_head_bytes: 16 * 1024,
            head_timeout: Duration::from_secs(10),
            pending_ttl: rendezvous::PENDING_TTL,
        }
    }
}

/// Accept loop for the public HTTP port.
pub async fn serve(listener: TcpListener, registry: Arc<Registry>, settings: ProxySettings) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!(peer = %peer_addr, "public connection accepted");
                let registry = registry.clone();
                let settings = settings.clone();
                tokio::spawn(handle_connection(stream, registry, settings));
            }
            Err(e) => {
                warn!(error = %e, "http accept failed");
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, registry: Arc<Registry>, settings: ProxySettings) {
    let head = match timeout(
        settings.head_timeout,
        read_request_head(&mut stream, settings.max_head_bytes),
    )
    .await
    {
        Ok(Ok(Some(head))) => head,
        // Oversize head, EOF before the terminator, transport error, or a
        // peer that never sent anything: close without a response.
        Ok(Ok(None)) | Ok(Err(_)) | Err(_) => return,
    };

    let Some(host) = extract_host(&head) else {
        return;
    };

    match registry.lookup_host(&host).await {
        Some(tunnel_id) => {
            debug!(host = %host, tunnel_id = %tunnel_id, "routing public request");
            rendezvous::initiate(registry, &tunnel_id, stream, head, settings.pending_ttl).await;
        }
        None => {
            debug!(host = %host, "no tunnel for host");
            let _ = stream.write_all(NOT_FOUND_RESPONSE).await;
            let _ = stream.flush().await;
        }
    }
}

/// Buffer from the socket until the `\r\n\r\n` terminator is seen.
///
/// Returns `Ok(None)` when the cap is exceeded or the peer closes before
/// completing a head. Bytes past the terminator (a pipelined body or
/// follow-up request) stay in the returned buffer and are forwarded
/// verbatim.
async fn read_request_head(stream: &mut TcpStream, max_bytes: usize) -> io::Result<Option<Vec<u8>>> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        head.extend_from_slice(&chunk[..n]);

        if find_terminator(&head).is_some() {
            return Ok(Some(head));
        }
        if head.len() > max_bytes {
            return Ok(None);
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

/// Extract the routing hostname from a buffered request head.
///
/// Takes the first header line whose name is `host` (any case), strips a
/// trailing `:<digits>` port, and lowercases the rest. Returns `None` when
/// the request carries no Host header.
fn extract_host(head: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(head);

    for line in text.split("\r\n").skip(1) {
        if line.is_empty() {
            break; // end of headers
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("host") {
            continue;
        }

        let mut host = value.trim().to_ascii_lowercase();
        if let Some(idx) = host.rfind(':') {
            let port = &host[idx + 1..];
            if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                host.truncate(idx);
            }
        }
        if host.is_empty() {
            return None;
        }
        return Some(host);
    }
    None
}
