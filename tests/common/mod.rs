//! Shared harness for the end-to-end tests: a throwaway PKI (CA, server
//! certificate, per-name client certificates), a small demo upstream
//! application, and helpers to run the load balancer in-process.
//!
//! The demo application protocol is two round trips:
//!   client sends `HELLO`, upstream answers `HI`,
//!   client sends `BYE`,   upstream answers `SEEYA`.
//! The point between the round trips is a place where both ends are known
//! to be connected, which the balancing tests use to hold many
//! connections open at once.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};

use rcgen::{
    CertificateParams, CertifiedIssuer, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    KeyPair, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_util::sync::CancellationToken;

use tollgate::{
    adapters::{build_server, ProbePool},
    config::models::{AppConfig, ProbeSettings, TlsPaths},
    core::{ClientID, Upstream},
};

pub const CLIENT_HELLO: &[u8] = b"HELLO";
pub const SERVER_HELLO: &[u8] = b"HI";
pub const CLIENT_GOODBYE: &[u8] = b"BYE";
pub const SERVER_GOODBYE: &[u8] = b"SEEYA";

static CRYPTO_PROVIDER_INIT: Once = Once::new();

pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// A throwaway PKI for one test: a CA, a server certificate for
/// `localhost`, and any number of client certificates issued on demand.
/// PEM files live in a temp dir so they can be fed to the server via its
/// file-path configuration.
pub struct TestPki {
    ca: CertifiedIssuer<'static, KeyPair>,
    dir: tempfile::TempDir,
    pub ca_path: PathBuf,
    pub server_cert_path: PathBuf,
    pub server_key_path: PathBuf,
}

impl TestPki {
    pub fn new() -> Self {
        ensure_crypto_provider();

        let mut ca_params = CertificateParams::default();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let mut ca_dn = DistinguishedName::new();
        ca_dn.push(DnType::CommonName, "test ca");
        ca_params.distinguished_name = ca_dn;
        let ca_key = KeyPair::generate().unwrap();
        let ca = CertifiedIssuer::self_signed(ca_params, ca_key).unwrap();

        let mut server_params = CertificateParams::default();
        let mut server_dn = DistinguishedName::new();
        server_dn.push(DnType::CommonName, "localhost");
        server_params.distinguished_name = server_dn;
        server_params.subject_alt_names = vec![
            SanType::DnsName("localhost".try_into().unwrap()),
            SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))),
        ];
        let server_key = KeyPair::generate().unwrap();
        let server_cert = server_params.signed_by(&server_key, &ca).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let ca_path = dir.path().join("ca.pem");
        let server_cert_path = dir.path().join("server-cert.pem");
        let server_key_path = dir.path().join("server-key.pem");
        std::fs::write(&ca_path, ca.as_ref().pem()).unwrap();
        std::fs::write(&server_cert_path, server_cert.pem()).unwrap();
        std::fs::write(&server_key_path, server_key.serialize_pem()).unwrap();

        Self {
            ca,
            dir,
            ca_path,
            server_cert_path,
            server_key_path,
        }
    }

    pub fn tls_paths(&self) -> TlsPaths {
        TlsPaths {
            cert_file: self.server_cert_path.clone(),
            key_file: self.server_key_path.clone(),
            ca_root_file: self.ca_path.clone(),
        }
    }

    /// Issue a client certificate with the given CommonName, returning
    /// (certificate DER, PKCS#8 key DER).
    pub fn issue_client_cert(&self, common_name: &str) -> (Vec<u8>, Vec<u8>) {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.ca).unwrap();
        (cert.der().to_vec(), key.serialize_der())
    }

    /// A TLS client configuration trusting this PKI's CA and presenting a
    /// client certificate with the given CommonName.
    pub fn client_tls_config(&self, common_name: &str) -> Arc<rustls::ClientConfig> {
        let (cert_der, key_der) = self.issue_client_cert(common_name);
        self.client_tls_config_from(cert_der, key_der)
    }

    pub fn client_tls_config_from(
        &self,
        cert_der: Vec<u8>,
        key_der: Vec<u8>,
    ) -> Arc<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        roots
            .add(CertificateDer::from(self.ca.as_ref().der().to_vec()))
            .unwrap();
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(
                vec![CertificateDer::from(cert_der)],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
            )
            .unwrap();
        Arc::new(config)
    }
}

/// A demo upstream application that speaks the HELLO/HI/BYE/SEEYA
/// protocol and tracks how many connections it has seen, including the
/// peak number open at once.
pub struct DemoUpstream {
    pub addr: SocketAddr,
    total: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    counts: Arc<Mutex<(usize, usize)>>, // (current, peak)
    accept_task: JoinHandle<()>,
}

impl DemoUpstream {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let total = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let counts = Arc::new(Mutex::new((0usize, 0usize)));

        let total_in_task = total.clone();
        let completed_in_task = completed.clone();
        let counts_in_task = counts.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                total_in_task.fetch_add(1, Ordering::SeqCst);
                let counts = counts_in_task.clone();
                let completed = completed_in_task.clone();
                {
                    let mut guard = counts.lock().unwrap();
                    guard.0 += 1;
                    guard.1 = guard.1.max(guard.0);
                }
                tokio::spawn(async move {
                    if serve_demo_conn(stream).await.is_ok() {
                        completed.fetch_add(1, Ordering::SeqCst);
                    }
                    counts.lock().unwrap().0 -= 1;
                });
            }
        });

        Self {
            addr,
            total,
            completed,
            counts,
            accept_task,
        }
    }

    pub fn upstream(&self) -> Upstream {
        Upstream::tcp(self.addr.to_string())
    }

    /// Connections accepted, including ones that never speak the demo
    /// protocol (e.g. health probes).
    pub fn total_connections(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Connections that ran the demo protocol to completion.
    pub fn completed_requests(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn peak_connections(&self) -> usize {
        self.counts.lock().unwrap().1
    }
}

impl Drop for DemoUpstream {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_demo_conn(mut stream: TcpStream) -> std::io::Result<()> {
    let mut hello = vec![0u8; CLIENT_HELLO.len()];
    stream.read_exact(&mut hello).await?;
    stream.write_all(SERVER_HELLO).await?;
    let mut goodbye = vec![0u8; CLIENT_GOODBYE.len()];
    stream.read_exact(&mut goodbye).await?;
    stream.write_all(SERVER_GOODBYE).await?;
    Ok(())
}

/// The load balancer under test, running in-process.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    probe_pool: Option<ProbePool>,
    serve_task: JoinHandle<eyre::Result<()>>,
}

impl TestServer {
    pub async fn spawn(cfg: AppConfig) -> Self {
        ensure_crypto_provider();
        let built = build_server(&cfg).await.unwrap();
        let addr = built.server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        if let Some(pool) = &built.probe_pool {
            pool.start(&shutdown);
        }
        let server = built.server;
        let token = shutdown.clone();
        let serve_task = tokio::spawn(async move { server.serve(token).await });
        Self {
            addr,
            shutdown,
            probe_pool: built.probe_pool,
            serve_task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Some(pool) = &self.probe_pool {
            pool.stop().await;
        }
        let _ = self.serve_task.await;
    }
}

/// Base configuration for tests: one listener on a free port, TLS off.
/// Tests toggle the pieces they exercise.
pub fn base_config(upstreams: Vec<Upstream>) -> AppConfig {
    AppConfig {
        listen_address: "127.0.0.1:0".to_string(),
        upstreams,
        max_conns_per_client: 25,
        insecure_accept_tcp: true,
        handshake_timeout: Duration::from_secs(2),
        dial_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(30),
        // Probing off by default; tests that want it turn it on.
        probe: ProbeSettings {
            period: Duration::ZERO,
            ..ProbeSettings::default()
        },
        accept_error_cooldown: Duration::from_millis(100),
        ..AppConfig::default()
    }
}

/// TLS variant of [`base_config`] with `name` as the only authorized
/// client.
pub fn tls_config(pki: &TestPki, upstreams: Vec<Upstream>, authorized: &[&str]) -> AppConfig {
    AppConfig {
        insecure_accept_tcp: false,
        tls: Some(pki.tls_paths()),
        authorized_clients: authorized
            .iter()
            .map(|name| ClientID::from_common_name(*name))
            .collect(),
        ..base_config(upstreams)
    }
}

/// Open a TLS connection to the balancer, authenticating as `client_name`.
pub async fn tls_connect(
    pki: &TestPki,
    client_name: &str,
    addr: SocketAddr,
) -> std::io::Result<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(pki.client_tls_config(client_name));
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from("localhost").unwrap();
    connector.connect(server_name, tcp).await
}

/// Run the whole demo protocol over an established stream.
pub async fn run_demo_protocol<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    stream.write_all(CLIENT_HELLO).await?;
    let mut hello = vec![0u8; SERVER_HELLO.len()];
    stream.read_exact(&mut hello).await?;
    if hello != SERVER_HELLO {
        return Err(std::io::Error::other("unexpected server hello"));
    }
    stream.write_all(CLIENT_GOODBYE).await?;
    let mut goodbye = vec![0u8; SERVER_GOODBYE.len()];
    stream.read_exact(&mut goodbye).await?;
    if goodbye != SERVER_GOODBYE {
        return Err(std::io::Error::other("unexpected server goodbye"));
    }
    Ok(())
}
