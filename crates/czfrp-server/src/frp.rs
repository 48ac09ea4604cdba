//! FRP listener: accepts client connections and classifies each by its
//! first line.
//!
//! `CONTROL:` connections are held open for the life of the tunnel; the
//! reader half only watches for peer closure while the writer half pushes
//! `NEW_CONNECTION:` lines queued through the registry's control handle.
//! `DATA:` connections claim a pending rendezvous and become raw pipes.

use crate::callback::BotCallback;
use crate::registry::{ControlCommand, Registry};
use crate::rendezvous;
use czfrp_core::{read_line_bounded, Frame, FrpError, FrpResult, MAX_LINE_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Accept loop for the FRP port. Runs until the process exits; individual
/// connection failures never escape their own task.
pub async fn serve(listener: TcpListener, registry: Arc<Registry>, callback: Arc<BotCallback>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let registry = registry.clone();
                let callback = callback.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer_addr, registry, callback).await
                    {
                        debug!(peer = %peer_addr, error = %e, "frp connection closed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "frp accept failed");
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    callback: Arc<BotCallback>,
) -> FrpResult<()> {
    let (line, leftover) = read_line_bounded(&mut stream, MAX_LINE_LEN).await?;

    match Frame::parse(&line)? {
        Frame::Control { tunnel_id } => {
            run_control(stream, peer_addr, tunnel_id, registry, callback).await
        }
        Frame::Data { token } => run_data(stream, leftover, token, registry).await,
        Frame::NewConnection { .. } => Err(FrpError::Protocol(
            "NEW_CONNECTION is server-to-client only".into(),
        )),
    }
}

/// Hold a bound control connection until the peer closes it or the tunnel
/// is deleted, then purge the tunnel.
async fn run_control(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tunnel_id: String,
    registry: Arc<Registry>,
    callback: Arc<BotCallback>,
) -> FrpResult<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlCommand>();
    let handle = registry.bind_control(&tunnel_id, tx, peer_addr).await?;
    info!(tunnel_id = %tunnel_id, peer = %peer_addr, "client connected");

    // Best-effort bot notification, off the connection path.
    if let Ok(snapshot) = registry.get_tunnel(&tunnel_id).await {
        let callback = callback.clone();
        tokio::spawn(async move {
            callback
                .notify_connected(&snapshot.tunnel_id, &snapshot.user_id)
                .await;
        });
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 64];

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(ControlCommand::NewConnection { token }) => {
                    let line = Frame::NewConnection { token: token.clone() }.encode();
                    let written = async {
                        writer.write_all(line.as_bytes()).await?;
                        writer.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        debug!(tunnel_id = %tunnel_id, error = %e, "control write failed");
                        // The client will never dial for this token; revoke it
                        // so the public socket closes now instead of at TTL.
                        registry.take_pending(&token).await;
                        break;
                    }
                }
                Some(ControlCommand::Shutdown) | None => {
                    debug!(tunnel_id = %tunnel_id, "control channel shut down");
                    break;
                }
            },
            read = reader.read(&mut scratch) => match read {
                // The client never writes after CONTROL; any payload here is
                // stray and ignored, but EOF or error means the peer is gone.
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }

    if let Some(purged) = registry.unbind_control(&handle).await {
        info!(tunnel_id = %purged, "client disconnected, tunnel purged");
    }
    Ok(())
}

/// Claim a pending rendezvous and splice the two sockets.
async fn run_data(
    stream: TcpStream,
    leftover: Vec<u8>,
    token: String,
    registry: Arc<Registry>,
) -> FrpResult<()> {
    let Some(pending) = registry.take_pending(&token).await else {
        // Unknown or expired token; drop the connection without a response.
        debug!(token = %token, "data channel for unknown token");
        return Ok(());
    };

    debug!(token = %token, "data channel paired");
    rendezvous::run_session(stream, leftover, pending).await;
    Ok(())
}
