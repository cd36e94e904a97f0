use eyre::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates orderly shutdown: OS signals are translated into a
/// cancellation token observed by the accept loop, the probe pool, and
/// every in-flight connection.
pub struct GracefulShutdown {
    cancel: CancellationToken,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// The shutdown token. Clones observe the same cancellation.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Manually trigger shutdown.
    pub fn trigger_shutdown(&self) {
        tracing::info!("shutdown triggered");
        self.cancel.cancel();
    }

    /// Listen for SIGINT / SIGTERM and trigger shutdown on the first one.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("received SIGINT, initiating shutdown");
            }
            _ = Self::wait_for_sigterm() => {
                tracing::info!("received SIGTERM, initiating shutdown");
            }
        }
        self.cancel.cancel();
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_sigterm() {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        sigterm.recv().await;
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() {
        std::future::pending::<()>().await;
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}
