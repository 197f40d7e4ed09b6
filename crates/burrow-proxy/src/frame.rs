//! Exact-length reads with explicit failure modes.
//!
//! A single unbuffered read can return fewer bytes than requested on any
//! stream, so every fixed-size protocol frame goes through [`read_exact`],
//! which loops across short reads and turns peer closure and elapsed
//! deadlines into distinct errors.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{ProxyError, Result};

/// Fill `buf` completely, or fail.
///
/// Peer closure before `buf.len()` bytes arrive yields
/// [`ProxyError::ConnectionClosed`]; a `deadline` elapsing first yields
/// [`ProxyError::Timeout`].
pub async fn read_exact<S>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: Option<Duration>,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let result = match deadline {
        Some(limit) => tokio::time::timeout(limit, stream.read_exact(buf))
            .await
            .map_err(|_| ProxyError::Timeout)?,
        None => stream.read_exact(buf).await,
    };

    match result {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProxyError::ConnectionClosed)
        }
        Err(e) => Err(ProxyError::Io(e)),
    }
}

/// Read a single byte.
pub async fn read_byte<S>(stream: &mut S, deadline: Option<Duration>) -> Result<u8>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1];
    read_exact(stream, &mut buf, deadline).await?;
    Ok(buf[0])
}

/// Read a big-endian u16 (network byte order).
pub async fn read_u16_be<S>(stream: &mut S, deadline: Option<Duration>) -> Result<u16>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    read_exact(stream, &mut buf, deadline).await?;
    Ok(u16::from_be_bytes(buf))
}
