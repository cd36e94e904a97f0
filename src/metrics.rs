//! Lightweight metrics helpers.
//!
//! Thin wrappers around the `metrics` crate macros. No exporter is
//! embedded; the application (or an embedder) can install any compatible
//! recorder. Provided metrics:
//!
//! * `tollgate_connections_accepted_total` (counter)
//! * `tollgate_connections_rejected_total` (counter, label: reason)
//! * `tollgate_dial_failures_total` (counter, label: upstream)
//! * `tollgate_forwarded_bytes_total` (counter, label: direction)
//! * `tollgate_active_sessions` (gauge)
//! * `tollgate_upstream_health` (gauge per upstream, 1 healthy / 0 unhealthy)

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use once_cell::sync::Lazy;

use crate::core::upstream::Upstream;

pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "tollgate_connections_accepted_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tollgate_connections_rejected_total";
pub const DIAL_FAILURES_TOTAL: &str = "tollgate_dial_failures_total";
pub const FORWARDED_BYTES_TOTAL: &str = "tollgate_forwarded_bytes_total";
pub const ACTIVE_SESSIONS: &str = "tollgate_active_sessions";
pub const UPSTREAM_HEALTH: &str = "tollgate_upstream_health";

static DESCRIBE: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        CONNECTIONS_ACCEPTED_TOTAL,
        Unit::Count,
        "Total client connections accepted by the listener."
    );
    describe_counter!(
        CONNECTIONS_REJECTED_TOTAL,
        Unit::Count,
        "Total client connections rejected before forwarding, by reason."
    );
    describe_counter!(
        DIAL_FAILURES_TOTAL,
        Unit::Count,
        "Total failed upstream dial attempts, by upstream."
    );
    describe_counter!(
        FORWARDED_BYTES_TOTAL,
        Unit::Bytes,
        "Total application bytes forwarded, by direction."
    );
    describe_gauge!(
        ACTIVE_SESSIONS,
        "Number of client connections currently being forwarded."
    );
    describe_gauge!(
        UPSTREAM_HEALTH,
        "Health belief per upstream (1 healthy, 0 unhealthy)."
    );
});

fn describe_once() {
    Lazy::force(&DESCRIBE);
}

pub fn record_connection_accepted() {
    describe_once();
    counter!(CONNECTIONS_ACCEPTED_TOTAL).increment(1);
}

/// Reasons a connection can be rejected before reaching an upstream.
#[derive(Debug, Clone, Copy)]
pub enum RejectReason {
    HandshakeFailed,
    RateLimited,
    NotAuthorized,
    DialFailed,
}

impl RejectReason {
    fn as_label(self) -> &'static str {
        match self {
            RejectReason::HandshakeFailed => "handshake_failed",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::NotAuthorized => "not_authorized",
            RejectReason::DialFailed => "dial_failed",
        }
    }
}

pub fn record_connection_rejected(reason: RejectReason) {
    describe_once();
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => reason.as_label()).increment(1);
}

pub fn record_dial_failure(upstream: &Upstream) {
    describe_once();
    counter!(DIAL_FAILURES_TOTAL, "upstream" => upstream.address.clone()).increment(1);
}

pub fn record_forwarded_bytes(direction: &'static str, bytes: u64) {
    describe_once();
    counter!(FORWARDED_BYTES_TOTAL, "direction" => direction).increment(bytes);
}

pub fn session_started() {
    describe_once();
    gauge!(ACTIVE_SESSIONS).increment(1.0);
}

pub fn session_finished() {
    describe_once();
    gauge!(ACTIVE_SESSIONS).decrement(1.0);
}

pub fn set_upstream_health(upstream: &Upstream, healthy: bool) {
    describe_once();
    gauge!(UPSTREAM_HEALTH, "upstream" => upstream.address.clone())
        .set(if healthy { 1.0 } else { 0.0 });
}
