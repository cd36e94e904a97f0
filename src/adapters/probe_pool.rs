//! Periodic active health probing.
//!
//! The pool runs one worker task per registered upstream. Every period a
//! worker dials its upstream through the configured dialer (which applies
//! the per-attempt timeout), closes the connection on success, and reports
//! the outcome to the health report sink. Probing continues regardless of
//! the upstream's current belief state and is not prioritized relative to
//! real traffic.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    core::upstream::{Upstream, UpstreamSet},
    ports::{
        dialer::UpstreamDialer,
        health::{HealthReport, HealthReportSink},
    },
};

pub struct ProbePoolConfig {
    pub period: Duration,
    pub upstreams: UpstreamSet,
    pub dialer: Arc<dyn UpstreamDialer>,
    pub sink: Arc<dyn HealthReportSink>,
}

/// Probes a set of upstreams on a periodic schedule.
///
/// Lifecycle: `new -> start -> stop`. `start` is idempotent after the
/// first call; `stop` cancels probing and waits for every worker to
/// quiesce. A stopped pool is terminal and cannot be restarted.
pub struct ProbePool {
    cfg: ProbePoolConfig,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    started: bool,
    stopped: bool,
    cancel: Option<CancellationToken>,
    workers: Vec<JoinHandle<()>>,
}

impl ProbePool {
    pub fn new(cfg: ProbePoolConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Launch one probe worker per registered upstream. Returns without
    /// blocking; reports flow to the sink asynchronously. Calls after the
    /// first are no-ops.
    pub fn start(&self, parent: &CancellationToken) {
        let mut state = self.state.lock().expect("probe pool lock poisoned");
        if state.started {
            return;
        }
        state.started = true;

        let cancel = parent.child_token();
        state.cancel = Some(cancel.clone());

        for upstream in &self.cfg.upstreams {
            let worker = ProbeWorker {
                upstream: upstream.clone(),
                period: self.cfg.period,
                dialer: Arc::clone(&self.cfg.dialer),
                sink: Arc::clone(&self.cfg.sink),
            };
            state
                .workers
                .push(tokio::spawn(worker.probe_forever(cancel.clone())));
        }

        tracing::info!(
            upstreams = self.cfg.upstreams.len(),
            period = ?self.cfg.period,
            "probe pool started"
        );
    }

    /// Cancel probing and wait until all probe workers have finished.
    /// A pool that was never started, or was already stopped, is left
    /// unchanged.
    pub async fn stop(&self) {
        let (cancel, workers) = {
            let mut state = self.state.lock().expect("probe pool lock poisoned");
            if !state.started || state.stopped {
                return;
            }
            state.stopped = true;
            (state.cancel.take(), std::mem::take(&mut state.workers))
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("probe pool stopped");
    }
}

/// Probes the health of a single upstream on a periodic schedule.
struct ProbeWorker {
    upstream: Upstream,
    period: Duration,
    dialer: Arc<dyn UpstreamDialer>,
    sink: Arc<dyn HealthReportSink>,
}

impl ProbeWorker {
    async fn probe_forever(self, cancel: CancellationToken) {
        // Stagger the first probe by a random fraction of the period so a
        // large fleet doesn't probe in lockstep.
        let jitter_budget_ms = (self.period.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::rng().random_range(0..jitter_budget_ms));
        let first_tick = tokio::time::Instant::now() + self.period + jitter;
        let mut ticker = tokio::time::interval_at(first_tick, self.period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.dialer.dial_upstream(&self.upstream) => result,
            };

            let report = match outcome {
                Ok(conn) => {
                    drop(conn);
                    HealthReport::success(self.upstream.clone())
                }
                Err(err) => {
                    tracing::debug!(upstream = %self.upstream, error = %err, "probe failed");
                    HealthReport::failure(self.upstream.clone(), err.to_string())
                }
            };
            self.sink.report_upstream_health(&report);
        }
    }
}
