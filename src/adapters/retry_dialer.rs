//! Retry-on-failure upstream dialing.
//!
//! The retry dialer asks its dial policy for the best candidate, dials it,
//! and on failure informs the policy and moves on to the next candidate.
//! One overall time budget is shared across all attempts; there is no
//! per-attempt subdivision, so a single slow dial can consume the whole
//! budget (the per-attempt cap, if any, is the inner dialer's concern).

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::{timeout_at, Instant},
};

use crate::{
    core::upstream::{Upstream, UpstreamSet},
    metrics,
    ports::{
        conn::DuplexConn,
        dialer::{BestUpstreamDialer, DialError, DialPolicy, UpstreamDialer},
    },
};

/// A [`BestUpstreamDialer`] that retries across candidates under one
/// shared deadline.
pub struct RetryDialer {
    timeout: Duration,
    policy: Arc<dyn DialPolicy>,
    inner: Arc<dyn UpstreamDialer>,
}

impl RetryDialer {
    pub fn new(timeout: Duration, policy: Arc<dyn DialPolicy>, inner: Arc<dyn UpstreamDialer>) -> Self {
        Self {
            timeout,
            policy,
            inner,
        }
    }
}

#[async_trait]
impl BestUpstreamDialer for RetryDialer {
    async fn dial_best_upstream(
        &self,
        candidates: &UpstreamSet,
    ) -> Result<(Upstream, DuplexConn), DialError> {
        if candidates.is_empty() {
            return Err(DialError::NoCandidateUpstreams);
        }
        let deadline = Instant::now() + self.timeout;

        // Candidates that fail a dial attempt are retired for the rest of
        // this call, so the policy reports each failure at most once and
        // the loop cannot revisit a dead upstream.
        let mut remaining = candidates.clone();

        loop {
            let upstream = self.policy.choose_best_upstream(&remaining)?;

            match timeout_at(deadline, self.inner.dial_upstream(&upstream)).await {
                Err(_elapsed) => {
                    // We cannot infer much about upstream health in this
                    // scenario, so the policy is not notified of a failure.
                    tracing::warn!(upstream = %upstream, "dial timed out");
                    return Err(DialError::DeadlineExceeded);
                }
                Ok(Err(err)) => {
                    tracing::warn!(upstream = %upstream, error = %err, "dial failed");
                    metrics::record_dial_failure(&upstream);
                    self.policy.dial_failed(&upstream, &err);
                    remaining.remove(&upstream);
                    continue;
                }
                Ok(Ok(conn)) => {
                    tracing::debug!(upstream = %upstream, "dial succeeded");
                    self.policy.dial_succeeded(&upstream);
                    let wrapped =
                        CloseNotifyingConn::new(conn, upstream.clone(), Arc::clone(&self.policy));
                    return Ok((upstream, Box::new(wrapped)));
                }
            }
        }
    }
}

/// Wraps an upstream connection so the dial policy hears about its close
/// exactly once.
///
/// Close in Rust is drop; the notification fires from `Drop` behind an
/// idempotent latch. A half-close (`poll_shutdown`) is not a close and
/// does not notify.
pub struct CloseNotifyingConn {
    inner: DuplexConn,
    upstream: Upstream,
    policy: Arc<dyn DialPolicy>,
    notified: bool,
}

impl std::fmt::Debug for CloseNotifyingConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseNotifyingConn")
            .field("inner", &self.inner)
            .field("upstream", &self.upstream)
            .field("notified", &self.notified)
            .finish_non_exhaustive()
    }
}

impl CloseNotifyingConn {
    pub fn new(inner: DuplexConn, upstream: Upstream, policy: Arc<dyn DialPolicy>) -> Self {
        Self {
            inner,
            upstream,
            policy,
            notified: false,
        }
    }
}

impl AsyncRead for CloseNotifyingConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CloseNotifyingConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Drop for CloseNotifyingConn {
    fn drop(&mut self) {
        if !self.notified {
            self.notified = true;
            self.policy.connection_closed(&self.upstream);
        }
    }
}
