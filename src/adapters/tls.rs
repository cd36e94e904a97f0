//! TLS termination and client identity extraction.
//!
//! The client-facing listener speaks TLS 1.3 only and requires a client
//! certificate verified against the configured roots. The canonical client
//! identity is the Subject CommonName of the leaf certificate presented by
//! the peer; an empty or missing CommonName is an authentication failure.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use eyre::{eyre, Context, Result};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use thiserror::Error;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::core::client::ClientID;

/// Failures while deriving a client identity from TLS state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthnError {
    #[error("authentication failure: no verified peer certificate")]
    NoPeerCertificate,

    #[error("authentication failure: malformed peer certificate")]
    MalformedCertificate,

    #[error("authentication failure: invalid client id")]
    InvalidClientID,
}

/// Load a PEM certificate chain, leaf first.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to parse certificates from {}", path.display()))?;
    if certs.is_empty() {
        return Err(eyre!("no certificates found in {}", path.display()));
    }
    Ok(certs)
}

/// Load a PEM private key (PKCS#8, PKCS#1 or SEC1).
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("failed to parse private key from {}", path.display()))?
        .ok_or_else(|| eyre!("no private key found in {}", path.display()))
}

/// Build the server-side TLS configuration: TLS 1.3 only, client
/// certificate required and verified against the given roots.
pub fn build_server_config(
    cert_file: &Path,
    key_file: &Path,
    ca_root_file: &Path,
) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_root_file)? {
        roots
            .add(cert)
            .context("failed to add CA root certificate")?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|err| eyre!("failed to build client certificate verifier: {err}"))?;

    let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .context("failed to build TLS server configuration")?;

    Ok(Arc::new(config))
}

/// Extract the canonical client identity from an established server-side
/// TLS connection. The leaf certificate of the verified peer chain
/// supplies the Subject CommonName.
pub fn extract_client_id(conn: &rustls::ServerConnection) -> Result<ClientID, AuthnError> {
    let certs = conn
        .peer_certificates()
        .ok_or(AuthnError::NoPeerCertificate)?;
    let leaf = certs.first().ok_or(AuthnError::NoPeerCertificate)?;
    client_id_from_leaf(leaf.as_ref())
}

/// Derive a client identity from a leaf certificate in DER form.
pub fn client_id_from_leaf(der: &[u8]) -> Result<ClientID, AuthnError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|_| AuthnError::MalformedCertificate)?;
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or("");
    if common_name.is_empty() {
        return Err(AuthnError::InvalidClientID);
    }
    Ok(ClientID::from_common_name(common_name))
}
