//! The accept loop and server wiring.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use eyre::{Context, Result};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    adapters::{
        forwarder::ForwardingSupervisor,
        handlers::{
            AnonymousHandler, AuthzHandler, ForwardHandler, MtlsHandler, RateLimitHandler,
            RecoverHandler,
        },
        probe_pool::{ProbePool, ProbePoolConfig},
        retry_dialer::RetryDialer,
        tcp_dialer::{TcpUpstreamDialer, TimeoutDialer},
        tls,
    },
    config::models::AppConfig,
    core::{
        authorizer::StaticAuthorizer,
        client::ClientID,
        dial_policy::LeastConnectionPolicy,
        health::{AlwaysHealthy, BeliefConfig, BeliefHealthTracker, HealthBelief},
        reserver::{BoundedClientReserver, UnboundedClientReserver},
    },
    metrics,
    ports::{
        handler::{ConnContext, ConnHandler},
        health::HealthView,
        reserver::ClientReserver,
    },
    tracing_setup,
};

/// Accepts client connections and hands each one to the handler pipeline
/// in its own task.
pub struct Server {
    listener: TcpListener,
    handler: Arc<dyn ConnHandler>,
    accept_error_cooldown: Duration,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        handler: Arc<dyn ConnHandler>,
        accept_error_cooldown: Duration,
    ) -> Self {
        Self {
            listener,
            handler,
            accept_error_cooldown,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until the cancellation token fires.
    ///
    /// Accept errors are logged and followed by a brief cooldown; they do
    /// not bring the server down.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "listening");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("accept loop stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        metrics::record_connection_accepted();
                        let handler = Arc::clone(&self.handler);
                        let ctx = ConnContext::new(peer_addr, cancel.child_token());
                        let span = tracing_setup::connection_span(&peer_addr);
                        // The spawned task owns the client connection; the
                        // pipeline closes it by dropping it on any exit path.
                        tokio::spawn(
                            async move {
                                handler.handle(ctx, Box::new(stream)).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "listener accept error");
                        tokio::time::sleep(self.accept_error_cooldown).await;
                    }
                }
            }
        }
    }
}

/// A fully wired server plus the probe pool that feeds its health tracker
/// (absent when probing is disabled).
pub struct BuiltServer {
    pub server: Server,
    pub probe_pool: Option<ProbePool>,
}

/// Wire all components together from a validated configuration and bind
/// the listener.
pub async fn build_server(cfg: &AppConfig) -> Result<BuiltServer> {
    let reserver: Arc<dyn ClientReserver> = if cfg.max_conns_per_client > 0 {
        Arc::new(BoundedClientReserver::new(cfg.max_conns_per_client))
    } else {
        Arc::new(UnboundedClientReserver)
    };

    let authorizer = Arc::new(StaticAuthorizer::new(cfg.authz_tables()?));
    let upstreams = cfg.upstream_set();

    let (health_view, probe_pool): (Arc<dyn HealthView>, Option<ProbePool>) =
        if cfg.probe.period.is_zero() {
            (Arc::new(AlwaysHealthy), None)
        } else {
            let tracker = Arc::new(BeliefHealthTracker::new(
                &upstreams,
                BeliefConfig {
                    prior: HealthBelief::Healthy,
                    min_failures_to_unhealthy: cfg.probe.unhealthy_threshold,
                    min_successes_to_healthy: cfg.probe.healthy_threshold,
                },
            ));
            let pool = ProbePool::new(ProbePoolConfig {
                period: cfg.probe.period,
                upstreams: upstreams.clone(),
                dialer: Arc::new(TimeoutDialer::new(cfg.probe.timeout, TcpUpstreamDialer)),
                sink: tracker.clone(),
            });
            (tracker, Some(pool))
        };

    let policy = Arc::new(LeastConnectionPolicy::new());
    let dialer = Arc::new(RetryDialer::new(
        cfg.dial_timeout,
        policy,
        Arc::new(TcpUpstreamDialer),
    ));

    // Compose the handler stack, innermost first.
    let forward = Arc::new(ForwardHandler::new(
        health_view,
        dialer,
        ForwardingSupervisor::new(cfg.idle_timeout),
    ));
    let authz = Arc::new(AuthzHandler::new(authorizer, forward));
    let rate_limit = Arc::new(RateLimitHandler::new(reserver, authz));
    let authenticated: Arc<dyn ConnHandler> = match &cfg.tls {
        Some(tls_paths) => {
            let server_config = tls::build_server_config(
                &tls_paths.cert_file,
                &tls_paths.key_file,
                &tls_paths.ca_root_file,
            )?;
            Arc::new(MtlsHandler::new(
                TlsAcceptor::from(server_config),
                cfg.handshake_timeout,
                rate_limit,
            ))
        }
        None => Arc::new(AnonymousHandler::new(ClientID::anonymous(), rate_limit)),
    };
    let head = Arc::new(RecoverHandler::new(authenticated));

    let listener = TcpListener::bind(&cfg.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen_address))?;

    Ok(BuiltServer {
        server: Server::new(listener, head, cfg.accept_error_cooldown),
        probe_pool,
    })
}
