//! Token-based pairing of public connections with client data channels.
//!
//! `initiate` parks the public socket in the registry, signals the tunnel's
//! control channel, and arms a per-token reaper; `run_session` is the other
//! half, executed by the FRP listener once a `DATA:` claim arrives.

use crate::registry::{PendingConn, Registry};
use czfrp_core::{new_token, pump};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::debug;

/// How long an unclaimed rendezvous may wait before its public socket is
/// closed and the token forgotten.
pub const PENDING_TTL: Duration = Duration::from_secs(30);

/// Start a rendezvous for a public connection routed to `tunnel_id`.
///
/// Ownership of `public_stream` moves into the pending map; it comes back
/// out either in the FRP listener (token claimed) or in the reaper task
/// (TTL expired), and dropping it there closes the public side. When the
/// tunnel has no control channel, or signaling it fails, the stream is
/// simply dropped and the public client sees the connection close.
pub async fn initiate(
    registry: Arc<Registry>,
    tunnel_id: &str,
    public_stream: TcpStream,
    head: Vec<u8>,
    ttl: Duration,
) {
    let Some(control) = registry.control_handle(tunnel_id).await else {
        debug!(tunnel_id = %tunnel_id, "rendezvous skipped: tunnel not connected");
        return;
    };

    let token = new_token();
    registry
        .put_pending(
            &token,
            PendingConn {
                stream: public_stream,
                head,
                created: Instant::now(),
            },
        )
        .await;

    if control.notify_new_connection(&token).is_err() {
        // Control task went away between lookup and signal; revoke.
        registry.take_pending(&token).await;
        debug!(tunnel_id = %tunnel_id, "rendezvous revoked: control channel gone");
        return;
    }
    debug!(tunnel_id = %tunnel_id, token = %token, "client signaled for new connection");

    // Arm the reaper. If the token is still pending when it fires, the claim
    // never came and taking the entry closes the public socket.
    tokio::spawn(async move {
        sleep(ttl).await;
        if let Some(entry) = registry.take_pending(&token).await {
            debug!(
                token = %token,
                age_secs = entry.created.elapsed().as_secs(),
                "reaped unclaimed rendezvous"
            );
        }
    });
}

/// Run a paired session: replay the buffered request head toward the
/// client, then splice the client data channel with the public socket.
///
/// `leftover` holds bytes the client sent in the same segment as its
/// `DATA:` line; they belong to the client→public stream and are written
/// ahead of the pump.
pub async fn run_session(client_stream: TcpStream, leftover: Vec<u8>, pending: PendingConn) {
    let PendingConn {
        stream: public_stream,
        head,
        ..
    } = pending;

    let (mut client_read, mut client_write) = client_stream.into_split();
    let (mut public_read, mut public_write) = public_stream.into_split();

    let client_to_public = async {
        if !leftover.is_empty() {
            public_write.write_all(&leftover).await?;
            public_write.flush().await?;
        }
        pump(&mut client_read, &mut public_write).await
    };
    let public_to_client = async {
        if !head.is_empty() {
            client_write.write_all(&head).await?;
            client_write.flush().await?;
        }
        pump(&mut public_read, &mut client_write).await
    };

    let (to_public, to_client) = tokio::join!(client_to_public, public_to_client);
    debug!(
        to_public = to_public.unwrap_or(0),
        to_client = to_client.unwrap_or(0),
        "data session ended"
    );
}
