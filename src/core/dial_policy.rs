//! Least-connections dial policy.

use std::{collections::HashMap, io, sync::Mutex};

use crate::{
    core::upstream::{Upstream, UpstreamSet},
    ports::dialer::{DialError, DialPolicy},
};

/// A [`DialPolicy`] that always chooses a candidate with the minimal number
/// of open connections.
///
/// Connection counts are tracked from dial and close events under a single
/// mutex; the lock is held only for map operations, never across I/O. A
/// linear scan over the candidates is fine at the expected fleet sizes
/// (thousands at most); candidates are scanned in set order so ties break
/// the same way on every call.
pub struct LeastConnectionPolicy {
    connection_count: Mutex<HashMap<Upstream, i64>>,
}

impl LeastConnectionPolicy {
    pub fn new() -> Self {
        Self {
            connection_count: Mutex::new(HashMap::new()),
        }
    }

    /// Current connection count for an upstream. Absent means zero.
    #[cfg(test)]
    fn count(&self, upstream: &Upstream) -> i64 {
        let counts = self.connection_count.lock().expect("count lock poisoned");
        counts.get(upstream).copied().unwrap_or(0)
    }
}

impl Default for LeastConnectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DialPolicy for LeastConnectionPolicy {
    fn choose_best_upstream(&self, candidates: &UpstreamSet) -> Result<Upstream, DialError> {
        let counts = self.connection_count.lock().expect("count lock poisoned");

        let mut best: Option<(&Upstream, i64)> = None;
        for upstream in candidates {
            let count = counts.get(upstream).copied().unwrap_or(0);
            match best {
                Some((_, best_count)) if best_count <= count => {}
                _ => best = Some((upstream, count)),
            }
        }

        match best {
            Some((upstream, _)) => Ok(upstream.clone()),
            None => Err(DialError::NoCandidateUpstreams),
        }
    }

    fn dial_failed(&self, _upstream: &Upstream, _symptom: &io::Error) {
        // A failed attempt never opened a connection, so counts are
        // unaffected.
    }

    fn dial_succeeded(&self, upstream: &Upstream) {
        let mut counts = self.connection_count.lock().expect("count lock poisoned");
        *counts.entry(upstream.clone()).or_insert(0) += 1;
    }

    fn connection_closed(&self, upstream: &Upstream) {
        let mut counts = self.connection_count.lock().expect("count lock poisoned");
        *counts.entry(upstream.clone()).or_insert(0) -= 1;
    }
}
