//! Bidirectional forwarding with an application-data idle timeout.
//!
//! The supervisor drives two copy workers, one per direction, in lockstep
//! periods of `idle_timeout`. Workers are released one task per period and
//! report how many bytes they moved, which lets the supervisor decide the
//! idle-timeout condition at known points. A worker whose source has
//! reached end-of-stream half-closes its destination and is not released
//! further.

use std::{fmt, io, pin::pin, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::{timeout_at, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{metrics, ports::conn::DuplexConn};

const COPY_BUF_SIZE: usize = 8 * 1024;

/// A single failure recorded while forwarding.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ForwardFailure {
    /// A copy operation failed with a real I/O error (deadline expiry is
    /// not an error; it just ends the period).
    #[error("{src}->{dst} copy error: {source}")]
    Copy {
        src: &'static str,
        dst: &'static str,
        #[source]
        source: io::Error,
    },

    /// The write side of a destination could not be shut down after its
    /// source reported end-of-stream.
    #[error("unable to close-write {dst} conn: {source}")]
    CloseWrite {
        dst: &'static str,
        #[source]
        source: io::Error,
    },

    /// A full period elapsed with no application data moving in either
    /// direction.
    #[error("no data copied within idle timeout")]
    IdleTimeout,

    /// The caller's cancellation token fired mid-forward.
    #[error("terminated by caller")]
    Cancelled,
}

/// Every failure recorded during a single `forward` call.
#[derive(Debug)]
pub struct AggregateError {
    pub failures: Vec<ForwardFailure>,
}

impl AggregateError {
    pub fn is_idle_timeout(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, ForwardFailure::IdleTimeout))
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "forwarding failed: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Result of releasing one period of work to a copy worker.
struct TaskResult {
    written: u64,
    failure: Option<ForwardFailure>,
}

/// Copies bytes from `src` to `dst`, one released task per period.
///
/// The worker never loses data across period boundaries: a chunk read but
/// not yet fully written is kept as pending and flushed at the start of
/// the next period.
struct CopyWorker<R, W> {
    src_label: &'static str,
    dst_label: &'static str,
    src: R,
    dst: W,
    work_remaining: bool,
    buf: Box<[u8]>,
    pending_off: usize,
    pending_len: usize,
}

impl<R, W> CopyWorker<R, W>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    fn new(src_label: &'static str, src: R, dst_label: &'static str, dst: W) -> Self {
        Self {
            src_label,
            dst_label,
            src,
            dst,
            work_remaining: true,
            buf: vec![0u8; COPY_BUF_SIZE].into_boxed_slice(),
            pending_off: 0,
            pending_len: 0,
        }
    }

    fn copy_failure(&self, source: io::Error) -> ForwardFailure {
        ForwardFailure::Copy {
            src: self.src_label,
            dst: self.dst_label,
            source,
        }
    }

    /// Work one period, until end-of-stream, an I/O error, or the period
    /// deadline. Deadline expiry is not a failure; it just bounds the
    /// period so the supervisor can take stock.
    async fn run_period(&mut self, deadline: Instant) -> TaskResult {
        let mut written = 0u64;
        if !self.work_remaining {
            return TaskResult {
                written,
                failure: None,
            };
        }
        loop {
            // Flush any bytes read in an earlier period but not yet written.
            while self.pending_off < self.pending_len {
                let chunk = &self.buf[self.pending_off..self.pending_len];
                match timeout_at(deadline, self.dst.write(chunk)).await {
                    Err(_elapsed) => {
                        return TaskResult {
                            written,
                            failure: None,
                        }
                    }
                    Ok(Err(err)) => {
                        return TaskResult {
                            written,
                            failure: Some(self.copy_failure(err)),
                        }
                    }
                    Ok(Ok(0)) => {
                        let err = io::Error::new(io::ErrorKind::WriteZero, "write returned zero");
                        return TaskResult {
                            written,
                            failure: Some(self.copy_failure(err)),
                        };
                    }
                    Ok(Ok(n)) => {
                        self.pending_off += n;
                        written += n as u64;
                    }
                }
            }
            self.pending_off = 0;
            self.pending_len = 0;

            match timeout_at(deadline, self.src.read(&mut self.buf)).await {
                Err(_elapsed) => {
                    return TaskResult {
                        written,
                        failure: None,
                    }
                }
                Ok(Err(err)) => {
                    return TaskResult {
                        written,
                        failure: Some(self.copy_failure(err)),
                    }
                }
                Ok(Ok(0)) => {
                    // End of stream: tell the destination not to expect any
                    // more bytes, then declare no work remaining.
                    self.work_remaining = false;
                    let failure = match timeout_at(deadline, self.dst.shutdown()).await {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(ForwardFailure::CloseWrite {
                            dst: self.dst_label,
                            source: err,
                        }),
                        Err(_elapsed) => Some(ForwardFailure::CloseWrite {
                            dst: self.dst_label,
                            source: io::Error::new(
                                io::ErrorKind::TimedOut,
                                "close-write timed out",
                            ),
                        }),
                    };
                    return TaskResult { written, failure };
                }
                Ok(Ok(n)) => {
                    self.pending_off = 0;
                    self.pending_len = n;
                }
            }
        }
    }
}

/// Robustly forwards application data between a client connection and an
/// upstream connection.
#[derive(Debug, Clone, Copy)]
pub struct ForwardingSupervisor {
    /// A period of this length in which no application data moves in
    /// either direction terminates the forwarding session.
    pub idle_timeout: Duration,
}

impl ForwardingSupervisor {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    /// Copy data between the two connections until both directions reach
    /// end-of-stream, an I/O error occurs, the idle timeout fires, or the
    /// cancellation token fires.
    ///
    /// The supervisor borrows both connections and never closes them; the
    /// caller owns them and closes them by dropping. The write side of
    /// either connection may be shut down to propagate end-of-stream.
    pub async fn forward(
        &self,
        cancel: &CancellationToken,
        client: &mut DuplexConn,
        upstream: &mut DuplexConn,
    ) -> Result<(), AggregateError> {
        let (client_read, client_write) = tokio::io::split(&mut **client);
        let (upstream_read, upstream_write) = tokio::io::split(&mut **upstream);

        // "cu" is client->upstream, "uc" is upstream->client.
        let mut cu = CopyWorker::new("client", client_read, "upstream", upstream_write);
        let mut uc = CopyWorker::new("upstream", upstream_read, "client", client_write);

        let mut failures: Vec<ForwardFailure> = Vec::new();

        while cu.work_remaining || uc.work_remaining {
            let deadline = Instant::now() + self.idle_timeout;
            let mut bytes_this_period = 0u64;

            {
                let mut cu_task = pin!(cu.run_period(deadline));
                let mut uc_task = pin!(uc.run_period(deadline));
                let mut cu_done = false;
                let mut uc_done = false;

                // Collect both workers' period results, reacting to the
                // first failure or cancellation. Abandoning a worker here
                // interrupts its in-flight read or write; its pending
                // buffer stays intact, though on the failure path nothing
                // will flush it.
                while !(cu_done && uc_done) {
                    tokio::select! {
                        result = &mut cu_task, if !cu_done => {
                            cu_done = true;
                            bytes_this_period += result.written;
                            metrics::record_forwarded_bytes("client_to_upstream", result.written);
                            if let Some(failure) = result.failure {
                                failures.push(failure);
                            }
                        }
                        result = &mut uc_task, if !uc_done => {
                            uc_done = true;
                            bytes_this_period += result.written;
                            metrics::record_forwarded_bytes("upstream_to_client", result.written);
                            if let Some(failure) = result.failure {
                                failures.push(failure);
                            }
                        }
                        _ = cancel.cancelled() => {
                            failures.push(ForwardFailure::Cancelled);
                        }
                    }
                    if !failures.is_empty() {
                        break;
                    }
                }
            }

            if !failures.is_empty() {
                break;
            }
            if !cu.work_remaining && !uc.work_remaining {
                break;
            }
            if bytes_this_period == 0 {
                failures.push(ForwardFailure::IdleTimeout);
                break;
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError { failures })
        }
    }
}
