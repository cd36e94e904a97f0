use std::{path::PathBuf, process, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::Result;
use tollgate::{
    config::{
        models::{AppConfig, ProbeSettings, TlsPaths},
        validation::AppConfigValidator,
    },
    core::{ClientID, Upstream},
    tracing_setup::{self, LogFormat},
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "An mTLS-terminating TCP load balancer")]
struct Args {
    /// Listen address as host:port
    #[clap(long, default_value = "0.0.0.0:4321")]
    listen_address: String,

    /// Comma-separated list of upstreams as host:port
    #[clap(long, required = true, value_delimiter = ',')]
    upstreams: Vec<String>,

    /// Connection limit per client; if not positive, no limit
    #[clap(long, default_value_t = 10)]
    max_conns_per_client: i64,

    /// Comma-separated list of authorized client CommonNames
    #[clap(long, value_delimiter = ',')]
    authzd_clients: Vec<String>,

    /// Filename of PEM-encoded private key, for serving TLS
    #[clap(long)]
    key_file: Option<PathBuf>,

    /// Filename of PEM-encoded certificate chain, ordered leaf first,
    /// for serving TLS
    #[clap(long)]
    cert_file: Option<PathBuf>,

    /// Filename of PEM-encoded trusted CA root certificates
    #[clap(long)]
    ca_root_file: Option<PathBuf>,

    /// Disable TLS and instead accept anonymous TCP connections (INSECURE)
    #[clap(long, default_value_t = false)]
    insecure_accept_tcp: bool,

    /// Authorization config file (JSON/YAML/TOML) with full group mappings
    #[clap(long)]
    authz_file: Option<PathBuf>,

    /// TLS handshake timeout
    #[clap(long, value_parser = humantime::parse_duration, default_value = "10s")]
    handshake_timeout: Duration,

    /// Overall time budget for dialing an upstream, shared across retries
    #[clap(long, value_parser = humantime::parse_duration, default_value = "10s")]
    dial_timeout: Duration,

    /// Close a forwarded connection after this long with no application
    /// data in either direction
    #[clap(long, value_parser = humantime::parse_duration, default_value = "5m")]
    idle_timeout: Duration,

    /// Health probe period; 0s disables probing
    #[clap(long, value_parser = humantime::parse_duration, default_value = "10s")]
    probe_period: Duration,

    /// Per-probe dial timeout
    #[clap(long, value_parser = humantime::parse_duration, default_value = "5s")]
    probe_timeout: Duration,

    /// Consecutive failed probes before an upstream is believed unhealthy
    #[clap(long, default_value_t = 3)]
    unhealthy_threshold: u32,

    /// Consecutive successful probes before an upstream is believed
    /// healthy again
    #[clap(long, default_value_t = 2)]
    healthy_threshold: u32,

    /// Log output format
    #[clap(long, default_value = "json", value_parser = parse_log_format)]
    log_format: LogFormat,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
}

fn config_from_args(args: &Args) -> Result<AppConfig, String> {
    let tls = match (&args.key_file, &args.cert_file, &args.ca_root_file) {
        (None, None, None) => None,
        (Some(key_file), Some(cert_file), Some(ca_root_file)) => Some(TlsPaths {
            cert_file: cert_file.clone(),
            key_file: key_file.clone(),
            ca_root_file: ca_root_file.clone(),
        }),
        _ => {
            return Err(
                "--key-file, --cert-file and --ca-root-file must be given together".to_string(),
            )
        }
    };

    Ok(AppConfig {
        listen_address: args.listen_address.clone(),
        upstreams: args.upstreams.iter().map(Upstream::tcp).collect(),
        max_conns_per_client: args.max_conns_per_client,
        authorized_clients: args
            .authzd_clients
            .iter()
            .map(ClientID::from_common_name)
            .collect(),
        authz_file: args.authz_file.clone(),
        tls,
        insecure_accept_tcp: args.insecure_accept_tcp,
        handshake_timeout: args.handshake_timeout,
        dial_timeout: args.dial_timeout,
        idle_timeout: args.idle_timeout,
        probe: ProbeSettings {
            period: args.probe_period,
            timeout: args.probe_timeout,
            unhealthy_threshold: args.unhealthy_threshold,
            healthy_threshold: args.healthy_threshold,
        },
        accept_error_cooldown: Duration::from_secs(1),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    tracing_setup::init_tracing(args.log_format)
        .map_err(|e| color_eyre::eyre::eyre!("failed to initialize tracing: {e}"))?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default reported an error: {:?}. \
            This can happen if a provider was already installed; proceeding.",
            e
        );
    }

    let cfg = match config_from_args(&args) {
        Ok(cfg) => cfg,
        Err(message) => {
            tracing::error!(%message, "invalid flags");
            process::exit(2);
        }
    };

    if let Err(err) = AppConfigValidator::validate(&cfg) {
        tracing::error!(error = %err, "configuration is invalid");
        process::exit(2);
    }

    tracing::info!(
        listen = %cfg.listen_address,
        upstreams = cfg.upstreams.len(),
        tls = cfg.tls.is_some(),
        max_conns_per_client = cfg.max_conns_per_client,
        "starting tollgate"
    );

    let built = tollgate::adapters::build_server(&cfg).await?;

    let shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler.run_signal_handler().await {
            tracing::error!(error = %e, "signal handler error");
        }
    });

    if let Some(pool) = &built.probe_pool {
        pool.start(&shutdown.token());
    }

    let result = built.server.serve(shutdown.token()).await;

    if let Some(pool) = &built.probe_pool {
        pool.stop().await;
    }

    result?;
    tracing::info!("server terminated normally");
    Ok(())
}
