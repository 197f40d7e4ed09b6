//! Outbound dial boundary and retry policy.
//!
//! The negotiators never open sockets themselves: they hand a resolved
//! `(host, port)` to a [`Dialer`], an injected capability constructed once
//! before the server starts accepting. The default [`TcpDialer`] connects
//! over plain TCP; an alternate transport (an overlay-network client, a
//! test double) implements the same trait and the protocol and relay code
//! never notices the difference.
//!
//! The retry policy lives here, not in the dialer implementations: it
//! exists to absorb transient unavailability of whatever transport is in
//! effect, including one that is still initializing when the first
//! connections arrive.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{ProxyError, Result};

/// A connected duplex byte stream, transport unspecified.
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyStream for T {}

/// Boxed stream returned by a [`Dialer`].
pub type BoxedStream = Box<dyn ProxyStream>;

/// Capability to establish an outbound connection to `(host, port)`.
///
/// One dial attempt; timeouts and retries are applied by the caller via
/// [`dial_with_retry`].
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

/// Per-destination retry policy owned by the proxy core.
#[derive(Debug, Clone)]
pub struct DialPolicy {
    /// Total connection attempts before giving up.
    /// Default: 3
    pub attempts: u32,

    /// Connect timeout applied to each individual attempt.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Fixed sleep between failed attempts (none after the last).
    /// Default: 3 seconds
    pub backoff: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            connect_timeout: Duration::from_secs(30),
            backoff: Duration::from_secs(3),
        }
    }
}

/// Dial `(host, port)` through `dialer`, retrying per `policy`.
///
/// # Errors
/// * `ProxyError::Dial` - All attempts failed or timed out; carries the
///   last attempt's error.
pub async fn dial_with_retry(
    dialer: &dyn Dialer,
    policy: &DialPolicy,
    host: &str,
    port: u16,
) -> Result<BoxedStream> {
    let attempts = policy.attempts.max(1);
    let mut last_err: Option<io::Error> = None;

    for attempt in 1..=attempts {
        let result = tokio::time::timeout(policy.connect_timeout, dialer.dial(host, port)).await;

        match result {
            Ok(Ok(stream)) => {
                debug!(host, port, attempt, "outbound dial succeeded");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                warn!(host, port, attempt, error = %e, "outbound dial failed");
                last_err = Some(e);
            }
            Err(_) => {
                warn!(host, port, attempt, "outbound dial timed out");
                last_err = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection attempt timed out",
                ));
            }
        }

        if attempt < attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    Err(ProxyError::Dial {
        host: host.to_string(),
        port,
        attempts,
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no attempts made")),
    })
}

/// Plain-TCP dialer with low-latency socket options.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Dialer that fails a fixed number of times before succeeding.
    struct FlakyDialer {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl Dialer for FlakyDialer {
        async fn dial(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                let (a, _b) = tokio::io::duplex(16);
                Ok(Box::new(a))
            }
        }
    }

    fn fast_policy() -> DialPolicy {
        DialPolicy {
            attempts: 3,
            connect_timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_dial_first_attempt_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let dialer = FlakyDialer {
            calls: Arc::clone(&calls),
            fail_first: 0,
        };
        let result = dial_with_retry(&dialer, &fast_policy(), "example.com", 80).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dial_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let dialer = FlakyDialer {
            calls: Arc::clone(&calls),
            fail_first: 2,
        };
        let result = dial_with_retry(&dialer, &fast_policy(), "example.com", 80).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dial_exhausts_exactly_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let dialer = FlakyDialer {
            calls: Arc::clone(&calls),
            fail_first: u32::MAX,
        };
        let err = dial_with_retry(&dialer, &fast_policy(), "example.com", 80)
            .await
            .err()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ProxyError::Dial { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Dial error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dial_backoff_spacing() {
        let calls = Arc::new(AtomicU32::new(0));
        let dialer = FlakyDialer {
            calls: Arc::clone(&calls),
            fail_first: u32::MAX,
        };
        let policy = DialPolicy {
            attempts: 3,
            connect_timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(50),
        };

        let start = tokio::time::Instant::now();
        let _ = dial_with_retry(&dialer, &policy, "example.com", 80).await;
        let elapsed = start.elapsed();

        // Two backoff sleeps between three attempts; none after the last.
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400));
    }

    /// Dialer whose attempts never resolve; the per-attempt timeout
    /// must cut each one off.
    struct HangingDialer;

    #[async_trait]
    impl Dialer for HangingDialer {
        async fn dial(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_dial_per_attempt_timeout() {
        let policy = DialPolicy {
            attempts: 2,
            connect_timeout: Duration::from_millis(30),
            backoff: Duration::from_millis(5),
        };
        let err = dial_with_retry(&HangingDialer, &policy, "example.com", 80)
            .await
            .err()
            .unwrap();
        match err {
            ProxyError::Dial { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("expected Dial error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dial_policy_defaults() {
        let policy = DialPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.connect_timeout, Duration::from_secs(30));
        assert_eq!(policy.backoff, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_tcp_dialer_connects_to_local_listener() {
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => return,
            Err(e) => panic!("bind failed: {e}"),
        };
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let dialer = TcpDialer;
        let stream = dialer.dial("127.0.0.1", addr.port()).await;
        assert!(stream.is_ok());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_dialer_refused_port() {
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => return,
            Err(e) => panic!("bind failed: {e}"),
        };
        let addr = listener.local_addr().unwrap();
        drop(listener); // Port now has no listener.

        let dialer = TcpDialer;
        let result = dialer.dial("127.0.0.1", addr.port()).await;
        assert!(result.is_err());
    }
}
