//! SOCKS5 negotiation state machine (RFC 1928 subset).
//!
//! Greeting, optional username/password sub-negotiation (RFC 1929), and
//! CONNECT command parsing. TCP CONNECT only; UDP ASSOCIATE and BIND are
//! rejected with reply code 7. The bound address in replies is always
//! `0.0.0.0:0`; clients do not rely on it.
//!
//! State flow:
//!
//! ```text
//! AwaitGreeting -> AwaitAuthOrCommand -> AwaitCommand -> Resolved | Rejected
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::frame;
use crate::{Credentials, Destination, ProxyError, Result};

pub const VERSION: u8 = 0x05;

/// Auth method ids offered in the greeting.
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USERNAME_PASSWORD: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// Username/password sub-negotiation version (RFC 1929).
pub const AUTH_VERSION: u8 = 0x01;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;

/// Read deadline applied across the whole handshake, so dead connections
/// are rejected early. Relaying afterwards has no deadline.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);

/// SOCKS5 reply codes (RFC 1928 §6).
pub mod reply {
    pub const SUCCEEDED: u8 = 0x00;
    pub const GENERAL_FAILURE: u8 = 0x01;
    pub const CONNECTION_NOT_ALLOWED: u8 = 0x02;
    pub const NETWORK_UNREACHABLE: u8 = 0x03;
    pub const HOST_UNREACHABLE: u8 = 0x04;
    pub const CONNECTION_REFUSED: u8 = 0x05;
    pub const TTL_EXPIRED: u8 = 0x06;
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Map a connection-level failure to the reply byte sent to the client.
///
/// Dial failures map to `0x05`, kept for wire compatibility with what
/// this proxy has always sent for an unreachable destination.
pub fn reply_code_for(err: &ProxyError) -> u8 {
    match err {
        ProxyError::UnsupportedCommand(_) => reply::COMMAND_NOT_SUPPORTED,
        ProxyError::UnsupportedAddressType(_) => reply::ADDRESS_TYPE_NOT_SUPPORTED,
        ProxyError::Dial { .. } => reply::CONNECTION_REFUSED,
        _ => reply::GENERAL_FAILURE,
    }
}

/// Send a command reply with the given code and a zeroed IPv4 bind
/// address/port, per the wire format.
pub async fn send_reply<S>(stream: &mut S, code: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

/// Run the greeting, optional auth sub-negotiation, and CONNECT command
/// parsing against `stream`.
///
/// On success the destination has been resolved and the caller dials it;
/// the success (or dial-failure) reply is the caller's to send, since it
/// depends on the dial outcome.
///
/// # Errors
/// * `ProxyError::ProtocolVersion` - greeting or command version is not 5,
///   or the auth sub-negotiation version is not 1. No reply is sent.
/// * `ProxyError::AuthenticationFailed` - method 2 not offered (replied
///   `0xFF`) or the presented pair does not match (replied status 1).
/// * `ProxyError::UnsupportedCommand` - non-CONNECT command; reply code 7
///   already sent with a zeroed bind address.
/// * `ProxyError::UnsupportedAddressType` - address type other than IPv4
///   or domain. No reply is sent.
/// * `ProxyError::ConnectionClosed` / `ProxyError::Timeout` - peer closed
///   mid-frame or the handshake deadline elapsed.
pub async fn negotiate<S>(stream: &mut S, credentials: Option<&Credentials>) -> Result<Destination>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = Some(HANDSHAKE_DEADLINE);

    // Greeting: version, method count, method ids.
    let mut head = [0u8; 2];
    frame::read_exact(stream, &mut head, deadline).await?;
    if head[0] != VERSION {
        return Err(ProxyError::ProtocolVersion(head[0]));
    }
    let mut methods = vec![0u8; head[1] as usize];
    frame::read_exact(stream, &mut methods, deadline).await?;

    match credentials {
        Some(creds) => {
            if !methods.contains(&METHOD_USERNAME_PASSWORD) {
                stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
                return Err(ProxyError::AuthenticationFailed);
            }
            stream
                .write_all(&[VERSION, METHOD_USERNAME_PASSWORD])
                .await?;
            authenticate(stream, creds, deadline).await?;
        }
        None => {
            stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
        }
    }

    // Command: version, command, reserved, address type.
    let mut head = [0u8; 4];
    frame::read_exact(stream, &mut head, deadline).await?;
    if head[0] != VERSION {
        return Err(ProxyError::ProtocolVersion(head[0]));
    }
    if head[1] != CMD_CONNECT {
        send_reply(stream, reply::COMMAND_NOT_SUPPORTED).await?;
        return Err(ProxyError::UnsupportedCommand(head[1]));
    }

    let host = match head[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            frame::read_exact(stream, &mut octets, deadline).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            // The declared length byte alone gates how many bytes are
            // consumed as the domain.
            let len = frame::read_byte(stream, deadline).await? as usize;
            let mut name = vec![0u8; len];
            frame::read_exact(stream, &mut name, deadline).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        other => return Err(ProxyError::UnsupportedAddressType(other)),
    };

    let port = frame::read_u16_be(stream, deadline).await?;
    let dest = Destination { host, port };
    debug!(dest = %dest, "SOCKS5 CONNECT resolved");
    Ok(dest)
}

/// Username/password sub-negotiation (RFC 1929).
async fn authenticate<S>(
    stream: &mut S,
    creds: &Credentials,
    deadline: Option<Duration>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = frame::read_byte(stream, deadline).await?;
    if version != AUTH_VERSION {
        return Err(ProxyError::ProtocolVersion(version));
    }

    let ulen = frame::read_byte(stream, deadline).await? as usize;
    let mut username = vec![0u8; ulen];
    frame::read_exact(stream, &mut username, deadline).await?;

    let plen = frame::read_byte(stream, deadline).await? as usize;
    let mut password = vec![0u8; plen];
    frame::read_exact(stream, &mut password, deadline).await?;

    if creds.matches(&username, &password) {
        stream.write_all(&[AUTH_VERSION, 0x00]).await?;
        Ok(())
    } else {
        stream.write_all(&[AUTH_VERSION, 0x01]).await?;
        Err(ProxyError::AuthenticationFailed)
    }
}
