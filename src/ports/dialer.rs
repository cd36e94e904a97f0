use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    core::upstream::{Upstream, UpstreamSet},
    ports::conn::DuplexConn,
};

/// Errors surfaced when dialing the best upstream out of a candidate set.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DialError {
    /// The candidate set was empty, or every candidate was exhausted.
    #[error("no candidate upstreams")]
    NoCandidateUpstreams,

    /// The overall dial budget was exceeded before any attempt succeeded.
    #[error("dial deadline exceeded")]
    DeadlineExceeded,

    /// The final dial attempt failed with an I/O error.
    #[error("dial failed: {0}")]
    Io(#[from] io::Error),
}

/// Establishes connections to single upstreams.
///
/// Implementations must honour cancellation through future drop and apply
/// any per-attempt timeout themselves (see `TimeoutDialer`).
#[async_trait]
pub trait UpstreamDialer: Send + Sync {
    async fn dial_upstream(&self, upstream: &Upstream) -> io::Result<DuplexConn>;
}

/// Dials the best upstream out of a set of candidates.
#[async_trait]
pub trait BestUpstreamDialer: Send + Sync {
    /// Consider the candidates and connect to the best one
    /// (implementation defined). On success the caller owns the returned
    /// connection and closes it by dropping it.
    async fn dial_best_upstream(
        &self,
        candidates: &UpstreamSet,
    ) -> Result<(Upstream, DuplexConn), DialError>;
}

/// Controls which upstream to dial out of a set of candidates, and learns
/// from dial and connection lifecycle events.
///
/// Methods are synchronous and cheap; implementations must tolerate
/// concurrent invocation.
pub trait DialPolicy: Send + Sync {
    /// Choose an upstream from the candidates. Fails with
    /// [`DialError::NoCandidateUpstreams`] if the policy finds none of the
    /// candidates feasible.
    fn choose_best_upstream(&self, candidates: &UpstreamSet) -> Result<Upstream, DialError>;

    /// A dial attempt to `upstream` failed with the given symptom.
    fn dial_failed(&self, upstream: &Upstream, symptom: &io::Error);

    /// A dial attempt to `upstream` succeeded.
    fn dial_succeeded(&self, upstream: &Upstream);

    /// A connection created by a prior successful dial attempt has been
    /// closed.
    fn connection_closed(&self, upstream: &Upstream);
}
