//! Line-delimited control framing for the FRP port.
//!
//! Wire format: a single UTF-8 line terminated by `\n` (an optional `\r`
//! before it is stripped). The first line of every connection decides its
//! role; after `DATA:` the connection degrades to a raw byte pipe.

use crate::error::{FrpError, FrpResult};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Longest accepted control line. A connection that sends more than this
/// without a newline is malformed and gets closed.
pub const MAX_LINE_LEN: usize = 1024;

/// A parsed control-protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client registers the control channel for a tunnel.
    Control { tunnel_id: String },
    /// Client claims a pending rendezvous with a data channel.
    Data { token: String },
    /// Server asks the client to open a new data channel.
    NewConnection { token: String },
}

impl Frame {
    /// Parse a frame from a line with the terminator already stripped.
    ///
    /// Prefixes are case-sensitive; anything unrecognized is a protocol
    /// error and the caller is expected to drop the connection.
    pub fn parse(line: &str) -> FrpResult<Frame> {
        if let Some(tunnel_id) = line.strip_prefix("CONTROL:") {
            return Ok(Frame::Control {
                tunnel_id: tunnel_id.to_string(),
            });
        }
        if let Some(token) = line.strip_prefix("DATA:") {
            return Ok(Frame::Data {
                token: token.to_string(),
            });
        }
        if let Some(token) = line.strip_prefix("NEW_CONNECTION:") {
            return Ok(Frame::NewConnection {
                token: token.to_string(),
            });
        }
        Err(FrpError::Protocol(format!(
            "unrecognized frame: {:?}",
            truncate(line, 64)
        )))
    }

    /// Encode the frame as a wire line, newline included.
    pub fn encode(&self) -> String {
        match self {
            Frame::Control { tunnel_id } => format!("CONTROL:{tunnel_id}\n"),
            Frame::Data { token } => format!("DATA:{token}\n"),
            Frame::NewConnection { token } => format!("NEW_CONNECTION:{token}\n"),
        }
    }
}

/// Read one `\n`-terminated line from `reader`, bounded by `max_len`.
///
/// Returns the decoded line (without `\r\n`) and any bytes that were read
/// past the newline. The leftover matters for `DATA:` connections, where
/// payload bytes may arrive in the same segment as the frame line and must
/// not be lost.
///
/// Errors with [`FrpError::Protocol`] when the bound is exceeded or the
/// stream ends before a newline, and with [`FrpError::Io`] on read failure.
pub async fn read_line_bounded<R>(reader: &mut R, max_len: usize) -> FrpResult<(String, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    let mut chunk = [0u8; 256];

    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let leftover = buf.split_off(pos + 1);
            buf.pop(); // the newline
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            let line = String::from_utf8(buf)
                .map_err(|_| FrpError::Protocol("frame line is not valid UTF-8".into()))?;
            return Ok((line, leftover));
        }

        if buf.len() > max_len {
            return Err(FrpError::Protocol(format!(
                "frame line exceeded {max_len} bytes"
            )));
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(FrpError::Protocol(
                "connection closed before frame line".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn parse_round_trip() {
        let frames = [
            Frame::Control {
                tunnel_id: "t-1".into(),
            },
            Frame::Data {
                token: "abc123".into(),
            },
            Frame::NewConnection {
                token: "abc123".into(),
            },
        ];
        for frame in frames {
            let line = frame.encode();
            let parsed = Frame::parse(line.trim_end_matches('\n')).unwrap();
            assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn parse_rejects_unknown_prefix() {
        assert!(Frame::parse("HELLO:world").is_err());
        assert!(Frame::parse("control:t-1").is_err());
        assert!(Frame::parse("").is_err());
    }

    #[test]
    fn parse_keeps_colons_in_payload() {
        let frame = Frame::parse("DATA:a:b:c").unwrap();
        assert_eq!(
            frame,
            Frame::Data {
                token: "a:b:c".into()
            }
        );
    }

    #[tokio::test]
    async fn read_line_strips_terminator() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        tx.write_all(b"CONTROL:t-1\r\n").await.unwrap();
        let (line, leftover) = read_line_bounded(&mut rx, MAX_LINE_LEN).await.unwrap();
        assert_eq!(line, "CONTROL:t-1");
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn read_line_preserves_leftover() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        tx.write_all(b"DATA:tok\npayload bytes").await.unwrap();
        let (line, leftover) = read_line_bounded(&mut rx, MAX_LINE_LEN).await.unwrap();
        assert_eq!(line, "DATA:tok");
        assert_eq!(leftover, b"payload bytes");
    }

    #[tokio::test]
    async fn read_line_enforces_bound() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        tx.write_all(&[b'x'; 2048]).await.unwrap();
        let err = read_line_bounded(&mut rx, MAX_LINE_LEN).await.unwrap_err();
        assert!(matches!(err, FrpError::Protocol(_)));
    }

    #[tokio::test]
    async fn read_line_errors_on_eof() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        tx.write_all(b"DATA:partial").await.unwrap();
        drop(tx);
        let err = read_line_bounded(&mut rx, MAX_LINE_LEN).await.unwrap_err();
        assert!(matches!(err, FrpError::Protocol(_)));
    }
}
