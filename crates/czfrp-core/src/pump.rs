//! Byte pumping between socket halves.
//!
//! One [`pump`] per direction; a full-duplex session is two pumps joined.
//! Each read is written and flushed before the next read so no bytes are
//! ever dropped, and a finished pump shuts its writer down so the far side
//! can drain and terminate.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Bytes read per iteration of a copy loop.
pub const COPY_BUF_SIZE: usize = 4096;

/// Copy `reader` into `writer` until EOF or error, flushing after every
/// write. The writer is shut down for writing on the way out either way.
/// Returns the number of bytes copied.
pub async fn pump<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; COPY_BUF_SIZE];
    let mut copied = 0u64;

    let result = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break Ok(copied),
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    break Err(e);
                }
                if let Err(e) = writer.flush().await {
                    break Err(e);
                }
                copied += n as u64;
            }
            Err(e) => break Err(e),
        }
    };

    let _ = writer.shutdown().await;
    result
}

/// Splice two sockets together until either side closes.
///
/// Returns the per-direction results: bytes copied `a`→`b` and `b`→`a`.
/// When one direction terminates its writer half is shut down, which lets
/// the opposite pump observe EOF and finish draining.
pub async fn splice(a: TcpStream, b: TcpStream) -> (io::Result<u64>, io::Result<u64>) {
    let (mut a_read, mut a_write) = a.into_split();
    let (mut b_read, mut b_write) = b.into_split();

    tokio::join!(
        pump(&mut a_read, &mut b_write),
        pump(&mut b_read, &mut a_write),
    )
}
