//! Dual-protocol forward proxy core.
//!
//! `burrow-proxy` accepts inbound client connections on a SOCKS5 endpoint
//! and/or an HTTP (CONNECT-capable) endpoint, optionally authenticates
//! them, dials the client-requested destination, and relays bytes in both
//! directions until either side closes.
//!
//! # Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ProxyServer (per-endpoint accept loop)
//!   |
//!   +-- SOCKS5 endpoint --> socks::negotiate()
//!   |                            |
//!   +-- HTTP endpoint ----> http::negotiate()
//!                                |
//!                                v
//!                     Dialer (retry + connect timeout)
//!                                |
//!                                v
//!                        relay::relay() until EOF/error
//! ```
//!
//! # Components
//!
//! - [`socks`]: SOCKS5 greeting, username/password sub-negotiation,
//!   CONNECT command parsing
//! - [`http`]: HTTP request-line/header parsing, Basic auth, CONNECT
//!   handshake and absolute-URI forwarding
//! - [`Dialer`]: outbound connection boundary; pluggable so that an
//!   alternate transport can stand in for plain TCP
//! - [`relay`]: byte-transparent bidirectional copy loop
//! - [`ProxyServer`]: binds the endpoints and supervises one task per
//!   accepted connection
//!
//! # Usage
//!
//! ```ignore
//! use burrow_proxy::{ListenerConfig, ProxyConfig, ProxyServer};
//!
//! let config = ProxyConfig {
//!     socks: Some(ListenerConfig::new("127.0.0.1:1080".parse()?)),
//!     http: Some(ListenerConfig::new("127.0.0.1:8080".parse()?)),
//!     ..Default::default()
//! };
//!
//! let server = ProxyServer::new(config);
//! server.run().await?;
//! ```

mod dial;
mod frame;
pub mod http;
pub mod relay;
mod server;
pub mod socks;

pub use dial::{dial_with_retry, BoxedStream, DialPolicy, Dialer, ProxyStream, TcpDialer};
pub use server::{ProxyConfig, ProxyHandle, ProxyServer};

use std::net::SocketAddr;

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while handling a proxied connection.
///
/// All variants except [`ProxyError::Bind`] and
/// [`ProxyError::NoEndpoints`] are local to a single connection: they are
/// translated into a protocol-level rejection reply where the phase still
/// allows one, and into silent stream closure where it does not. They are
/// never fatal to the listener or to other connections.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Failed to bind a listener. Fatal to startup.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Neither endpoint is enabled. Fatal to startup.
    #[error("no proxy endpoints enabled")]
    NoEndpoints,

    /// Peer spoke a protocol version we do not implement.
    #[error("unsupported protocol version {0:#04x}")]
    ProtocolVersion(u8),

    /// SOCKS5 command other than CONNECT.
    #[error("unsupported SOCKS5 command {0:#04x} (only CONNECT)")]
    UnsupportedCommand(u8),

    /// SOCKS5 address type other than IPv4 or domain.
    #[error("unsupported SOCKS5 address type {0:#04x}")]
    UnsupportedAddressType(u8),

    /// Credentials missing, malformed, or not matching the configured pair.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Peer closed the connection in the middle of a frame.
    #[error("peer closed the connection mid-frame")]
    ConnectionClosed,

    /// A handshake read deadline elapsed.
    #[error("read deadline elapsed")]
    Timeout,

    /// The request could not be parsed as a proxy request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Outbound dial failed after all retry attempts.
    #[error("dial to {host}:{port} failed after {attempts} attempts: {source}")]
    Dial {
        host: String,
        port: u16,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// Socket I/O failed during negotiation or relay.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Static username/password pair for an endpoint.
///
/// Compared by exact equality against what the client presents. Absence of
/// configured credentials means no authentication is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Exact-equality check against a presented pair.
    pub fn matches(&self, username: &[u8], password: &[u8]) -> bool {
        self.username.as_bytes() == username && self.password.as_bytes() == password
    }
}

/// Immutable per-endpoint listener configuration.
///
/// One instance per protocol endpoint; endpoints are fully independent and
/// share no mutable state.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind the endpoint to.
    pub bind: SocketAddr,

    /// Optional static credentials. `None` disables authentication.
    pub credentials: Option<Credentials>,
}

impl ListenerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            credentials: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// A destination resolved during negotiation, before the outbound dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
