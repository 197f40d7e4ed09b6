//! Dual-endpoint proxy server.
//!
//! Binds the SOCKS5 and/or HTTP listeners, accepts connections, and runs
//! one task per connection through negotiate, dial, relay.
//!
//! # Lifecycle
//!
//! ```text
//! ProxyServer::new(config)
//!       |
//!       v
//! ProxyServer::start() --> ProxyHandle
//!       |                       |
//!       v                       |
//! Accept loops (SOCKS5, HTTP)   |
//!       |                       v
//!       |               ProxyHandle::shutdown()
//!       |                       |
//!       v                       v
//! Graceful shutdown <-----------+
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::http::{self, RelayMode};
use crate::relay::relay;
use crate::socks::{self, reply};
use crate::{
    dial_with_retry, Credentials, DialPolicy, Dialer, ListenerConfig, ProxyError, Result,
    TcpDialer,
};

/// Accept backlog for each endpoint listener.
const ACCEPT_BACKLOG: u32 = 128;

/// Configuration for the dual-endpoint server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// SOCKS5 endpoint. `None` disables it.
    /// Default: loopback, OS-assigned port, no authentication
    pub socks: Option<ListenerConfig>,

    /// HTTP endpoint. `None` disables it.
    /// Default: loopback, OS-assigned port, no authentication
    pub http: Option<ListenerConfig>,

    /// Outbound dial retry policy, shared by both endpoints.
    pub dial_policy: DialPolicy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let loopback: SocketAddr = "127.0.0.1:0".parse().expect("hardcoded loopback address");
        Self {
            socks: Some(ListenerConfig::new(loopback)),
            http: Some(ListenerConfig::new(loopback)),
            dial_policy: DialPolicy::default(),
        }
    }
}

/// Which protocol an endpoint speaks. Fixed per listener, never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Socks5,
    Http,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Socks5 => write!(f, "socks5"),
            Protocol::Http => write!(f, "http"),
        }
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Join handle for the server task.
    join_handle: Option<tokio::task::JoinHandle<Result<()>>>,

    /// Actual SOCKS5 bind address, if that endpoint is enabled.
    socks_addr: Option<SocketAddr>,

    /// Actual HTTP bind address, if that endpoint is enabled.
    http_addr: Option<SocketAddr>,
}

impl ProxyHandle {
    /// Check if the server is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Actual SOCKS5 bind address (port resolved if configured as 0).
    pub fn socks_addr(&self) -> Option<SocketAddr> {
        self.socks_addr
    }

    /// Actual HTTP bind address (port resolved if configured as 0).
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Shut down the proxy server gracefully.
    ///
    /// Signals the server task via the shutdown channel and waits briefly
    /// for it to stop. In-flight connections are dropped with the task.
    ///
    /// # Errors
    /// Currently infallible; always returns `Ok`.
    pub async fn shutdown(mut self) -> Result<()> {
        let signal_sent = if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).is_ok()
        } else {
            false
        };

        if let Some(handle) = self.join_handle.take() {
            if signal_sent {
                // Give the task time to respond to the signal; it holds
                // no state worth waiting longer for.
                let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
            } else {
                handle.abort();
            }
        }

        Ok(())
    }
}

/// Dual-endpoint proxy server.
///
/// Owns the configuration and the outbound [`Dialer`]; the dialer is
/// fixed before any listener starts accepting, so every connection ever
/// handled dials through the same transport.
pub struct ProxyServer {
    config: ProxyConfig,
    dialer: Arc<dyn Dialer>,
}

impl ProxyServer {
    /// Create a server that dials destinations over plain TCP.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer))
    }

    /// Create a server with an alternate outbound transport.
    pub fn with_dialer(config: ProxyConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self { config, dialer }
    }

    /// Start the server as a background task.
    ///
    /// Pre-binds every enabled endpoint so OS-assigned ports are known
    /// immediately and bind failures surface here rather than inside the
    /// spawned task.
    ///
    /// # Errors
    /// * `ProxyError::NoEndpoints` - Neither endpoint is enabled.
    /// * `ProxyError::Bind` - Binding an endpoint listener failed.
    pub async fn start(self) -> Result<ProxyHandle> {
        let endpoints = self.bind_endpoints().await?;
        let socks_addr = endpoints.socks_addr();
        let http_addr = endpoints.http_addr();
        let dialer = self.dialer;
        let dial_policy = self.config.dial_policy;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(async move {
            tokio::select! {
                result = run_endpoints(endpoints, dialer, dial_policy) => result,
                _ = shutdown_rx => Ok(()),
            }
        });

        Ok(ProxyHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
            socks_addr,
            http_addr,
        })
    }

    /// Run the server in the current task until an accept-loop error.
    ///
    /// Alternative to `start()` for blocking operation.
    ///
    /// # Errors
    /// * `ProxyError::NoEndpoints` - Neither endpoint is enabled.
    /// * `ProxyError::Bind` - Binding an endpoint listener failed.
    pub async fn run(self) -> Result<()> {
        let endpoints = self.bind_endpoints().await?;
        run_endpoints(endpoints, self.dialer, self.config.dial_policy).await
    }

    async fn bind_endpoints(&self) -> Result<Endpoints> {
        if self.config.socks.is_none() && self.config.http.is_none() {
            return Err(ProxyError::NoEndpoints);
        }

        let mut endpoints = Endpoints {
            socks: None,
            http: None,
        };

        if let Some(cfg) = &self.config.socks {
            let listener = bind_listener(cfg.bind).await?;
            let addr = listener.local_addr().map_err(|e| ProxyError::Bind {
                addr: cfg.bind,
                source: e,
            })?;
            info!(%addr, "SOCKS5 endpoint listening");
            endpoints.socks = Some((listener, cfg.credentials.clone()));
        }

        if let Some(cfg) = &self.config.http {
            let listener = bind_listener(cfg.bind).await?;
            let addr = listener.local_addr().map_err(|e| ProxyError::Bind {
                addr: cfg.bind,
                source: e,
            })?;
            info!(%addr, "HTTP endpoint listening");
            endpoints.http = Some((listener, cfg.credentials.clone()));
        }

        Ok(endpoints)
    }
}

/// Pre-bound endpoint listeners, paired with their credentials.
struct Endpoints {
    socks: Option<(TcpListener, Option<Credentials>)>,
    http: Option<(TcpListener, Option<Credentials>)>,
}

impl Endpoints {
    fn socks_addr(&self) -> Option<SocketAddr> {
        self.socks.as_ref().and_then(|(l, _)| l.local_addr().ok())
    }

    fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|(l, _)| l.local_addr().ok())
    }
}

/// Bind a listener with address reuse and a bounded accept backlog.
async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let bind_err = |source| ProxyError::Bind { addr, source };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(ACCEPT_BACKLOG).map_err(bind_err)
}

/// Run the enabled accept loops concurrently in the current task; the
/// first accept-loop failure (not per-connection failure) ends the
/// server and drops every listener with it.
async fn run_endpoints(
    endpoints: Endpoints,
    dialer: Arc<dyn Dialer>,
    dial_policy: DialPolicy,
) -> Result<()> {
    match (endpoints.socks, endpoints.http) {
        (Some((socks_listener, socks_creds)), Some((http_listener, http_creds))) => {
            tokio::select! {
                result = accept_loop(
                    Protocol::Socks5,
                    socks_listener,
                    socks_creds,
                    Arc::clone(&dialer),
                    dial_policy.clone(),
                ) => result,
                result = accept_loop(
                    Protocol::Http,
                    http_listener,
                    http_creds,
                    dialer,
                    dial_policy,
                ) => result,
            }
        }
        (Some((listener, creds)), None) => {
            accept_loop(Protocol::Socks5, listener, creds, dialer, dial_policy).await
        }
        (None, Some((listener, creds))) => {
            accept_loop(Protocol::Http, listener, creds, dialer, dial_policy).await
        }
        (None, None) => Err(ProxyError::NoEndpoints),
    }
}

/// Accept connections forever, one task each. A failed accept is logged
/// and does not stop the loop; a failed connection never affects another.
async fn accept_loop(
    protocol: Protocol,
    listener: TcpListener,
    credentials: Option<Credentials>,
    dialer: Arc<dyn Dialer>,
    dial_policy: DialPolicy,
) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(%protocol, error = %e, "accept failed");
                continue;
            }
        };
        debug!(%protocol, %peer, "connection accepted");

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }

        let credentials = credentials.clone();
        let dialer = Arc::clone(&dialer);
        let dial_policy = dial_policy.clone();
        tokio::spawn(async move {
            let result = match protocol {
                Protocol::Socks5 => {
                    handle_socks(stream, credentials.as_ref(), &*dialer, &dial_policy).await
                }
                Protocol::Http => {
                    handle_http(stream, credentials.as_ref(), &*dialer, &dial_policy).await
                }
            };
            match result {
                Ok(()) => debug!(%protocol, %peer, "connection finished"),
                Err(e) => debug!(%protocol, %peer, error = %e, "connection failed"),
            }
        });
    }
}

/// Negotiate SOCKS5, dial, reply, relay. Both streams are dropped
/// together on every return path.
async fn handle_socks(
    mut stream: TcpStream,
    credentials: Option<&Credentials>,
    dialer: &dyn Dialer,
    dial_policy: &DialPolicy,
) -> Result<()> {
    let dest = socks::negotiate(&mut stream, credentials).await?;

    let mut upstream = match dial_with_retry(dialer, dial_policy, &dest.host, dest.port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            socks::send_reply(&mut stream, socks::reply_code_for(&e)).await?;
            return Err(e);
        }
    };

    socks::send_reply(&mut stream, reply::SUCCEEDED).await?;
    relay(&mut stream, &mut upstream).await
}

/// Negotiate HTTP, dial, reply or forward, relay. Dial failures close
/// the client without a status line; only auth failures (handled inside
/// the negotiator) get an error response.
async fn handle_http(
    mut stream: TcpStream,
    credentials: Option<&Credentials>,
    dialer: &dyn Dialer,
    dial_policy: &DialPolicy,
) -> Result<()> {
    let request = http::negotiate(&mut stream, credentials).await?;
    let dest = &request.destination;

    let mut upstream = dial_with_retry(dialer, dial_policy, &dest.host, dest.port).await?;

    match request.mode {
        RelayMode::Tunnel => {
            stream.write_all(http::RESPONSE_ESTABLISHED).await?;
        }
        RelayMode::Forward(raw) => {
            upstream.write_all(&raw).await?;
        }
    }

    relay(&mut stream, &mut upstream).await
}
