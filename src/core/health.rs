//! Health belief tracking.
//!
//! The tracker maintains a per-upstream belief (HEALTHY or UNHEALTHY)
//! derived from streams of check reports. Belief only flips after a
//! configured number of consecutive observations, which filters out
//! one-off glitches in either direction.

use std::{collections::HashMap, sync::Mutex};

use crate::{
    core::upstream::{Upstream, UpstreamSet},
    ports::health::{CheckResult, HealthReport, HealthReportSink, HealthView},
};

/// The tracker's current classification of an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthBelief {
    Healthy,
    Unhealthy,
}

/// Configuration for a [`BeliefHealthTracker`].
#[derive(Debug, Clone, Copy)]
pub struct BeliefConfig {
    /// Belief assigned to every upstream before any observations arrive.
    pub prior: HealthBelief,
    /// Consecutive failed checks required to infer UNHEALTHY. Must be ≥ 1.
    pub min_failures_to_unhealthy: u32,
    /// Consecutive successful checks required to infer HEALTHY. Must be ≥ 1.
    pub min_successes_to_healthy: u32,
}

impl Default for BeliefConfig {
    fn default() -> Self {
        Self {
            prior: HealthBelief::Healthy,
            min_failures_to_unhealthy: 3,
            min_successes_to_healthy: 2,
        }
    }
}

/// Belief state for a single upstream. Counters saturate at their
/// thresholds so a long run of identical reports cannot overflow.
#[derive(Debug)]
struct BeliefState {
    state: HealthBelief,
    failures: u32,
    successes: u32,
}

impl BeliefState {
    fn update(&mut self, cfg: &BeliefConfig, result: CheckResult) {
        match result {
            CheckResult::CheckSuccess => {
                self.failures = 0;
                self.successes = (self.successes + 1).min(cfg.min_successes_to_healthy);
                if self.successes >= cfg.min_successes_to_healthy {
                    self.state = HealthBelief::Healthy;
                }
            }
            CheckResult::CheckFail => {
                self.successes = 0;
                self.failures = (self.failures + 1).min(cfg.min_failures_to_unhealthy);
                if self.failures >= cfg.min_failures_to_unhealthy {
                    self.state = HealthBelief::Unhealthy;
                }
            }
        }
    }
}

/// Tracks a health belief per registered upstream.
///
/// The set of tracked upstreams is fixed at construction; reports about
/// unknown upstreams are ignored and unknown upstreams are never returned
/// from [`HealthView::healthy_upstreams`]. Each upstream's state sits
/// behind its own mutex; there is no cross-upstream invariant and no
/// global snapshot guarantee.
pub struct BeliefHealthTracker {
    cfg: BeliefConfig,
    states: HashMap<Upstream, Mutex<BeliefState>>,
}

impl BeliefHealthTracker {
    pub fn new(upstreams: &UpstreamSet, cfg: BeliefConfig) -> Self {
        let states = upstreams
            .iter()
            .map(|u| {
                (
                    u.clone(),
                    Mutex::new(BeliefState {
                        state: cfg.prior,
                        failures: 0,
                        successes: 0,
                    }),
                )
            })
            .collect();
        Self { cfg, states }
    }

    /// Current belief about an upstream, or `None` if it is not tracked.
    pub fn current_belief(&self, upstream: &Upstream) -> Option<HealthBelief> {
        self.states
            .get(upstream)
            .map(|state| state.lock().expect("belief lock poisoned").state)
    }
}

impl HealthReportSink for BeliefHealthTracker {
    fn report_upstream_health(&self, report: &HealthReport) {
        let Some(state) = self.states.get(&report.upstream) else {
            return; // Upstream was not registered, ignore.
        };
        let mut state = state.lock().expect("belief lock poisoned");
        state.update(&self.cfg, report.result);
        crate::metrics::set_upstream_health(
            &report.upstream,
            state.state == HealthBelief::Healthy,
        );
    }
}

impl HealthView for BeliefHealthTracker {
    fn healthy_upstreams(&self, candidates: &UpstreamSet) -> UpstreamSet {
        candidates
            .iter()
            .filter(|u| self.current_belief(u) == Some(HealthBelief::Healthy))
            .cloned()
            .collect()
    }
}

/// A trivial health view that believes every candidate is healthy, used
/// when active probing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysHealthy;

impl HealthView for AlwaysHealthy {
    fn healthy_upstreams(&self, candidates: &UpstreamSet) -> UpstreamSet {
        candidates.clone()
    }
}

impl HealthReportSink for AlwaysHealthy {
    fn report_upstream_health(&self, _report: &HealthReport) {}
}
