//! The per-connection handler pipeline.
//!
//! Each accepted client connection flows through a linear stack of
//! handlers: panic recovery, authentication, rate limiting, authorization,
//! and finally forwarding. Every layer owns its inner layer and invokes it
//! at most once; returning early from any layer drops the connection,
//! which closes it. The balancer never writes an application-level error
//! to the client; failure is signalled by closing.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio_rustls::TlsAcceptor;

use crate::{
    adapters::{forwarder::ForwardingSupervisor, tls},
    core::client::ClientID,
    metrics::{self, RejectReason},
    ports::{
        authorizer::Authorizer,
        conn::DuplexConn,
        dialer::BestUpstreamDialer,
        handler::{ConnContext, ConnHandler},
        health::HealthView,
        reserver::{ClientReserver, ReserveError},
    },
};

/// Traps panics from the inner pipeline so a defective handler cannot take
/// down the accept loop. The connection is dropped (closed) either way.
pub struct RecoverHandler {
    inner: Arc<dyn ConnHandler>,
}

impl RecoverHandler {
    pub fn new(inner: Arc<dyn ConnHandler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ConnHandler for RecoverHandler {
    async fn handle(&self, ctx: ConnContext, conn: DuplexConn) {
        let peer_addr = ctx.peer_addr;
        let result = AssertUnwindSafe(self.inner.handle(ctx, conn))
            .catch_unwind()
            .await;
        if let Err(payload) = result {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(peer = %peer_addr, panic = %msg, "unexpected panic in connection handler");
        }
    }
}

/// Terminates TLS, derives the client identity from the verified client
/// certificate, and hands the decrypted stream to the inner handler.
pub struct MtlsHandler {
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    inner: Arc<dyn ConnHandler>,
}

impl MtlsHandler {
    pub fn new(
        acceptor: TlsAcceptor,
        handshake_timeout: Duration,
        inner: Arc<dyn ConnHandler>,
    ) -> Self {
        Self {
            acceptor,
            handshake_timeout,
            inner,
        }
    }
}

#[async_trait]
impl ConnHandler for MtlsHandler {
    async fn handle(&self, mut ctx: ConnContext, conn: DuplexConn) {
        let handshake = self.acceptor.accept(conn);
        let stream = match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Err(_elapsed) => {
                tracing::error!(peer = %ctx.peer_addr, "TLS handshake timed out");
                metrics::record_connection_rejected(RejectReason::HandshakeFailed);
                return;
            }
            Ok(Err(err)) => {
                tracing::error!(peer = %ctx.peer_addr, error = %err, "TLS handshake error");
                metrics::record_connection_rejected(RejectReason::HandshakeFailed);
                return;
            }
            Ok(Ok(stream)) => stream,
        };

        let client_id = match tls::extract_client_id(stream.get_ref().1) {
            Ok(client_id) => client_id,
            Err(err) => {
                tracing::error!(peer = %ctx.peer_addr, error = %err, "failed to extract client identity");
                metrics::record_connection_rejected(RejectReason::HandshakeFailed);
                return;
            }
        };

        ctx.client_id = Some(client_id);
        self.inner.handle(ctx, Box::new(stream)).await;
    }
}

/// Assigns a fixed anonymous identity to raw TCP clients. Insecure; only
/// for the explicit `--insecure-accept-tcp` mode.
pub struct AnonymousHandler {
    client_id: ClientID,
    inner: Arc<dyn ConnHandler>,
}

impl AnonymousHandler {
    pub fn new(client_id: ClientID, inner: Arc<dyn ConnHandler>) -> Self {
        Self { client_id, inner }
    }
}

#[async_trait]
impl ConnHandler for AnonymousHandler {
    async fn handle(&self, mut ctx: ConnContext, conn: DuplexConn) {
        tracing::warn!(peer = %ctx.peer_addr, "accepting insecure anonymous TCP connection");
        ctx.client_id = Some(self.client_id.clone());
        self.inner.handle(ctx, conn).await;
    }
}

/// Only admits the connection if a reservation can be acquired for its
/// client; the reservation is released on every exit path, panics
/// included.
pub struct RateLimitHandler {
    reserver: Arc<dyn ClientReserver>,
    inner: Arc<dyn ConnHandler>,
}

impl RateLimitHandler {
    pub fn new(reserver: Arc<dyn ClientReserver>, inner: Arc<dyn ConnHandler>) -> Self {
        Self { reserver, inner }
    }
}

struct ReservationGuard<'a> {
    reserver: &'a Arc<dyn ClientReserver>,
    client_id: &'a ClientID,
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.reserver.release(self.client_id) {
            tracing::error!(client = %self.client_id, error = %err, "failed to release reservation");
        }
    }
}

#[async_trait]
impl ConnHandler for RateLimitHandler {
    async fn handle(&self, ctx: ConnContext, conn: DuplexConn) {
        let Some(client_id) = ctx.client_id.clone() else {
            tracing::error!(peer = %ctx.peer_addr, "no client identity in connection context");
            return;
        };

        match self.reserver.try_reserve(&client_id) {
            Ok(()) => {}
            Err(ReserveError::RateLimited) => {
                tracing::warn!(client = %client_id, "client rate limited");
                metrics::record_connection_rejected(RejectReason::RateLimited);
                return;
            }
            Err(err) => {
                tracing::error!(client = %client_id, error = %err, "reservation error");
                return;
            }
        }

        let _guard = ReservationGuard {
            reserver: &self.reserver,
            client_id: &client_id,
        };
        self.inner.handle(ctx, conn).await;
    }
}

/// Computes the set of upstreams the client is authorized to reach. An
/// empty set closes the connection without contacting any upstream.
pub struct AuthzHandler {
    authorizer: Arc<dyn Authorizer>,
    inner: Arc<dyn ConnHandler>,
}

impl AuthzHandler {
    pub fn new(authorizer: Arc<dyn Authorizer>, inner: Arc<dyn ConnHandler>) -> Self {
        Self { authorizer, inner }
    }
}

#[async_trait]
impl ConnHandler for AuthzHandler {
    async fn handle(&self, mut ctx: ConnContext, conn: DuplexConn) {
        let Some(client_id) = ctx.client_id.clone() else {
            tracing::error!(peer = %ctx.peer_addr, "no client identity in connection context");
            return;
        };

        let authorized = self.authorizer.authorized_upstreams(&client_id);
        if authorized.is_empty() {
            tracing::warn!(client = %client_id, "client not authorized for forwarding");
            metrics::record_connection_rejected(RejectReason::NotAuthorized);
            return;
        }

        ctx.authorized_upstreams = Some(authorized);
        self.inner.handle(ctx, conn).await;
    }
}

/// Terminal layer: filters candidates by health belief, dials the best
/// upstream, and runs the forwarding engine between the two connections.
pub struct ForwardHandler {
    health: Arc<dyn HealthView>,
    dialer: Arc<dyn BestUpstreamDialer>,
    supervisor: ForwardingSupervisor,
}

impl ForwardHandler {
    pub fn new(
        health: Arc<dyn HealthView>,
        dialer: Arc<dyn BestUpstreamDialer>,
        supervisor: ForwardingSupervisor,
    ) -> Self {
        Self {
            health,
            dialer,
            supervisor,
        }
    }
}

#[async_trait]
impl ConnHandler for ForwardHandler {
    async fn handle(&self, ctx: ConnContext, mut conn: DuplexConn) {
        let Some(client_id) = ctx.client_id.clone() else {
            tracing::error!(peer = %ctx.peer_addr, "no client identity in connection context");
            return;
        };
        let Some(candidates) = ctx.authorized_upstreams.clone() else {
            tracing::error!(client = %client_id, "no candidate upstreams in connection context");
            return;
        };

        let healthy = self.health.healthy_upstreams(&candidates);
        let (upstream, mut upstream_conn) = match self.dialer.dial_best_upstream(&healthy).await {
            Ok(dialed) => dialed,
            Err(err) => {
                tracing::error!(client = %client_id, error = %err, "unable to dial any upstream");
                metrics::record_connection_rejected(RejectReason::DialFailed);
                return;
            }
        };

        tracing::info!(client = %client_id, upstream = %upstream, "forwarding");
        metrics::session_started();
        let outcome = self
            .supervisor
            .forward(&ctx.cancel, &mut conn, &mut upstream_conn)
            .await;
        metrics::session_finished();

        match outcome {
            Ok(()) => {
                tracing::info!(client = %client_id, upstream = %upstream, "forwarding complete");
            }
            Err(err) => {
                tracing::error!(
                    client = %client_id,
                    upstream = %upstream,
                    error = %err,
                    "forwarding terminated with error"
                );
            }
        }
        // Dropping upstream_conn here closes it and notifies the dial
        // policy; dropping conn closes the client side.
    }
}
