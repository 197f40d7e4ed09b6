//! HTTP proxy negotiation: request-line/header parsing, Basic auth, and
//! relay-mode selection.
//!
//! The whole request head is taken from a single read of up to
//! [`MAX_REQUEST`] bytes. Requests whose headers exceed one read are not
//! supported; that is an accepted protocol limitation, not something to
//! silently mask with buffering.
//!
//! `CONNECT` yields a raw tunnel after a `200 Connection Established`
//! reply. Any other method is treated as an absolute-URI proxy request:
//! the destination is extracted from the URI and the original request
//! bytes are forwarded verbatim, so the destination sees the client's
//! request as its own.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{Credentials, Destination, ProxyError, Result};

/// Maximum bytes read for the request line and headers.
pub const MAX_REQUEST: usize = 4096;

const RESPONSE_407: &[u8] = b"HTTP/1.1 407 Proxy Authentication Required\r\n\
    Proxy-Authenticate: Basic realm=\"proxy\"\r\n\
    Content-Length: 0\r\n\r\n";

pub const RESPONSE_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// How the connection proceeds once the destination is dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMode {
    /// `CONNECT`: reply `200 Connection Established`, then raw relay.
    Tunnel,
    /// Other methods: write these original request bytes to the
    /// destination first, then relay.
    Forward(Vec<u8>),
}

/// Outcome of a successful HTTP negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub destination: Destination,
    pub mode: RelayMode,
}

/// Read and parse one proxy request from `stream`, checking
/// `Proxy-Authorization` when credentials are configured.
///
/// The success reply (for `CONNECT`) is the caller's to send after the
/// dial succeeds. Dial and parse failures close the connection with no
/// further write; only authentication failures get an error response.
///
/// # Errors
/// * `ProxyError::AuthenticationFailed` - header missing or token
///   mismatch; a `407` response has already been written.
/// * `ProxyError::MalformedRequest` - request line or URI unparseable.
/// * `ProxyError::ConnectionClosed` - peer closed before sending anything.
pub async fn negotiate<S>(stream: &mut S, credentials: Option<&Credentials>) -> Result<HttpRequest>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_REQUEST];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(ProxyError::ConnectionClosed);
    }
    buf.truncate(n);

    let head = parse_head(&buf)?;

    if let Some(creds) = credentials {
        if !basic_token_matches(head.proxy_authorization.as_deref(), creds) {
            stream.write_all(RESPONSE_407).await?;
            return Err(ProxyError::AuthenticationFailed);
        }
    }

    let request = if head.method.eq_ignore_ascii_case("CONNECT") {
        HttpRequest {
            destination: parse_host_port(&head.target, 443)?,
            mode: RelayMode::Tunnel,
        }
    } else {
        HttpRequest {
            destination: parse_absolute_uri(&head.target)?,
            mode: RelayMode::Forward(buf),
        }
    };

    debug!(method = %head.method, dest = %request.destination, "HTTP request resolved");
    Ok(request)
}

/// Request line plus the one header this proxy cares about.
struct RequestHead {
    method: String,
    target: String,
    proxy_authorization: Option<String>,
}

fn parse_head(buf: &[u8]) -> Result<RequestHead> {
    let head = String::from_utf8_lossy(buf);
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("empty request".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing method".to_string()))?;
    let target = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing request target".to_string()))?;

    let proxy_authorization = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("proxy-authorization")
            .then(|| value.trim().to_string())
    });

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        proxy_authorization,
    })
}

/// Check a `Proxy-Authorization` value against the configured pair. The
/// presented token must equal the base64 of `username:password` exactly.
fn basic_token_matches(presented: Option<&str>, creds: &Credentials) -> bool {
    let Some(value) = presented else {
        return false;
    };
    let Some(token) = value.strip_prefix("Basic ").or_else(|| value.strip_prefix("basic ")) else {
        return false;
    };
    let expected = BASE64.encode(format!("{}:{}", creds.username, creds.password));
    token.trim() == expected
}

/// Split `host[:port]`, falling back to `default_port`.
fn parse_host_port(target: &str, default_port: u16) -> Result<Destination> {
    let (host, port) = match target.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str.parse::<u16>().map_err(|_| {
                ProxyError::MalformedRequest(format!("invalid port in {target:?}"))
            })?;
            (host, port)
        }
        None => (target, default_port),
    };
    if host.is_empty() {
        return Err(ProxyError::MalformedRequest(format!(
            "empty host in {target:?}"
        )));
    }
    Ok(Destination {
        host: host.to_string(),
        port,
    })
}

/// Extract (host, port) from an absolute URI, ignoring the path. A
/// leading `scheme://` is stripped if present; port defaults to 80.
fn parse_absolute_uri(target: &str) -> Result<Destination> {
    let rest = match target.find("://") {
        Some(idx) => &target[idx + 3..],
        None => target,
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    parse_host_port(authority, 80)
}
