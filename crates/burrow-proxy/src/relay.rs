//! Byte-transparent bidirectional relay.
//!
//! Given two already-open duplex streams, waits for readability on either
//! side, reads up to a fixed chunk, and writes the bytes verbatim to the
//! other side. A zero-length read is an orderly close and terminates the
//! relay immediately; the remaining direction is not drained. There is no
//! idle timeout: a long-lived quiet tunnel blocks on readiness until one
//! side closes or errors.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::Result;

/// Relay read/write chunk size.
pub const CHUNK_SIZE: usize = 4096;

/// Pump bytes between `client` and `destination` until either side
/// reaches end-of-stream or an I/O error occurs.
///
/// Both streams are owned by the caller's task; on every return path the
/// caller drops them together, so neither side is ever left half-open and
/// read from.
///
/// # Errors
/// * `ProxyError::Io` - A read or write on either stream failed. Orderly
///   closes are not errors.
pub async fn relay<A, B>(client: &mut A, destination: &mut B) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let mut client_buf = [0u8; CHUNK_SIZE];
    let mut dest_buf = [0u8; CHUNK_SIZE];
    let mut client_to_dest: u64 = 0;
    let mut dest_to_client: u64 = 0;

    let result = loop {
        // One multiplexed wait per iteration: read whichever side is
        // ready, forward, loop. Both reads are cancel-safe.
        tokio::select! {
            read = client.read(&mut client_buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = destination.write_all(&client_buf[..n]).await {
                        break Err(e);
                    }
                    client_to_dest += n as u64;
                }
                Err(e) => break Err(e),
            },
            read = destination.read(&mut dest_buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = client.write_all(&dest_buf[..n]).await {
                        break Err(e);
                    }
                    dest_to_client += n as u64;
                }
                Err(e) => break Err(e),
            },
        }
    };

    debug!(
        client_to_dest,
        dest_to_client,
        clean = result.is_ok(),
        "relay finished"
    );

    result.map_err(Into::into)
}
