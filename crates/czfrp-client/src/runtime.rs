//! Client runtime: the control loop and the data channels it spawns.
//!
//! The control connection carries only server-to-client command lines.
//! Each `NEW_CONNECTION` spawns an independent task, so data sessions
//! never block the control loop or each other.

use crate::config::ClientConfig;
use anyhow::{Context, Result};
use czfrp_core::{splice, Frame};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Establish the control channel and react to server commands until the
/// server closes the connection.
///
/// Returns `Ok(())` on a clean server-side close; connection failures and
/// mid-stream errors propagate.
pub async fn run(config: ClientConfig) -> Result<()> {
    let server_addr = config.server_addr();
    let stream = TcpStream::connect(&server_addr)
        .await
        .with_context(|| format!("cannot connect to the czfrp server at {server_addr}"))?;
    let (reader, mut writer) = stream.into_split();

    let control_frame = Frame::Control {
        tunnel_id: config.tunnel_id.clone(),
    };
    writer
        .write_all(control_frame.encode().as_bytes())
        .await
        .context("failed to register the control channel")?;
    writer
        .flush()
        .await
        .context("failed to register the control channel")?;

    info!(
        tunnel_id = %config.tunnel_id,
        server = %server_addr,
        "control channel established, waiting for traffic"
    );

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("control channel read failed")?
    {
        match Frame::parse(&line) {
            Ok(Frame::NewConnection { token }) => {
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = open_data_channel(&config, &token).await {
                        warn!(token = %token, error = %e, "data channel failed");
                    }
                });
            }
            Ok(other) => {
                debug!(frame = ?other, "ignoring unexpected control frame");
            }
            Err(e) => {
                debug!(error = %e, "ignoring unparseable control line");
            }
        }
    }

    Ok(())
}

/// Open one data channel: dial the server with the token, dial the local
/// service, and splice the two until either side closes.
async fn open_data_channel(config: &ClientConfig, token: &str) -> Result<()> {
    let mut server_stream = TcpStream::connect(config.server_addr())
        .await
        .context("cannot open a data channel to the server")?;
    let data_frame = Frame::Data {
        token: token.to_string(),
    };
    server_stream
        .write_all(data_frame.encode().as_bytes())
        .await
        .context("failed to claim the data channel")?;
    server_stream
        .flush()
        .await
        .context("failed to claim the data channel")?;

    // A failed local dial drops the server stream, which resets the
    // waiting public connection.
    let local_addr = config.local_addr();
    let local_stream = TcpStream::connect(&local_addr)
        .await
        .with_context(|| format!("cannot reach the local service at {local_addr}"))?;

    debug!(token = %token, "data channel open");
    let (to_local, to_server) = splice(server_stream, local_stream).await;
    debug!(
        token = %token,
        to_local = to_local.unwrap_or(0),
        to_server = to_server.unwrap_or(0),
        "data channel closed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use czfrp_core::read_line_bounded;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn control_loop_opens_data_channels() {
        let frp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let frp_addr = frp_listener.local_addr().unwrap();
        let local_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = local_listener.local_addr().unwrap();

        let config = ClientConfig {
            server_ip: "127.0.0.1".into(),
            server_port: frp_addr.port(),
            local_ip: "127.0.0.1".into(),
            local_port: local_addr.port(),
            tunnel_id: "t-test".into(),
        };

        // Local echo service handling a single connection.
        tokio::spawn(async move {
            let (mut stream, _) = local_listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let client = tokio::spawn(run(config));

        // Pose as the server: take the control registration, command one
        // data channel.
        let (mut control, _) = frp_listener.accept().await.unwrap();
        let (line, _) = read_line_bounded(&mut control, 1024).await.unwrap();
        assert_eq!(line, "CONTROL:t-test");
        control.write_all(b"NEW_CONNECTION:tok-1\n").await.unwrap();

        let (mut data, _) = frp_listener.accept().await.unwrap();
        let (line, leftover) = read_line_bounded(&mut data, 1024).await.unwrap();
        assert_eq!(line, "DATA:tok-1");
        assert!(leftover.is_empty());

        // Bytes pushed into the data channel reach the local service and
        // its reply comes back on the same channel.
        data.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        data.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");

        // Closing the control channel ends the run loop cleanly.
        drop(control);
        let result = client.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unreachable_local_service_drops_the_channel() {
        let frp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let frp_addr = frp_listener.local_addr().unwrap();

        // A port with nothing listening on it.
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = unused.local_addr().unwrap().port();
        drop(unused);

        let config = ClientConfig {
            server_ip: "127.0.0.1".into(),
            server_port: frp_addr.port(),
            local_ip: "127.0.0.1".into(),
            local_port: dead_port,
            tunnel_id: "t-test".into(),
        };

        let result = open_data_channel(&config, "tok-dead").await;

        // The server side sees the claim line, then the connection dies.
        let (mut data, _) = frp_listener.accept().await.unwrap();
        let (line, _) = read_line_bounded(&mut data, 1024).await.unwrap();
        assert_eq!(line, "DATA:tok-dead");
        assert!(result.is_err());

        let mut rest = Vec::new();
        data.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
