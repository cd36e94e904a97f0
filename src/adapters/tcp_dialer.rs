//! Plain TCP upstream dialing.

use std::{io, time::Duration};

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::{
    core::upstream::Upstream,
    ports::{conn::DuplexConn, dialer::UpstreamDialer},
};

/// Dials upstreams over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpUpstreamDialer;

#[async_trait]
impl UpstreamDialer for TcpUpstreamDialer {
    async fn dial_upstream(&self, upstream: &Upstream) -> io::Result<DuplexConn> {
        if upstream.network != "tcp" {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported upstream network: {}", upstream.network),
            ));
        }
        let stream = TcpStream::connect(&upstream.address).await?;
        Ok(Box::new(stream))
    }
}

/// Applies a per-attempt timeout around an inner dialer.
pub struct TimeoutDialer<D> {
    timeout: Duration,
    inner: D,
}

impl<D> TimeoutDialer<D> {
    pub fn new(timeout: Duration, inner: D) -> Self {
        Self { timeout, inner }
    }
}

#[async_trait]
impl<D: UpstreamDialer> UpstreamDialer for TimeoutDialer<D> {
    async fn dial_upstream(&self, upstream: &Upstream) -> io::Result<DuplexConn> {
        match tokio::time::timeout(self.timeout, self.inner.dial_upstream(upstream)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("dial of {upstream} timed out after {:?}", self.timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_refused_port_fails() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = TcpUpstreamDialer;
        let err = dialer
            .dial_upstream(&Upstream::tcp(addr.to_string()))
            .await
            .unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_dial_listening_port_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = TcpUpstreamDialer;
        let conn = dialer.dial_upstream(&Upstream::tcp(addr.to_string())).await;
        assert!(conn.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_network_is_rejected() {
        let dialer = TcpUpstreamDialer;
        let upstream = Upstream {
            network: "unix".to_string(),
            address: "/tmp/sock".to_string(),
        };
        let err = dialer.dial_upstream(&upstream).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_timeout_dialer_reports_timed_out() {
        struct NeverDialer;

        #[async_trait]
        impl UpstreamDialer for NeverDialer {
            async fn dial_upstream(&self, _upstream: &Upstream) -> io::Result<DuplexConn> {
                std::future::pending().await
            }
        }

        let dialer = TimeoutDialer::new(Duration::from_millis(10), NeverDialer);
        let err = dialer
            .dial_upstream(&Upstream::tcp("192.0.2.1:9"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
