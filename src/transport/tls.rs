//! TLS setup for listeners and dialers.
//!
//! Listeners load a PEM certificate chain and private key from disk. Dialers
//! trust exactly the PEM certificate carried by the endpoint they dial.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;

use crate::config::TlsSettings;
use crate::utils::{Error, Result};

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_error(err: impl std::fmt::Display) -> Error {
    Error::Tls(err.to_string())
}

pub fn acceptor(settings: &TlsSettings) -> Result<TlsAcceptor> {
    info!(
        "Loading TLS certificate {} and key {}",
        settings.cert_path, settings.key_path
    );
    let certs = load_certs(&settings.cert_path)?;
    let key = load_private_key(&settings.key_path)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(tls_error)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A connector trusting only the certificates in `pem`.
pub fn connector(pem: &str) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certs(&mut pem.as_bytes())? {
        roots.add(cert).map_err(tls_error)?;
    }

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

pub fn server_name(domain: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(domain.to_string()).map_err(tls_error)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    parse_certs(&mut reader)
}

fn parse_certs(reader: &mut dyn std::io::BufRead) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(tls_error)?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificates found".to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(tls_error)?
        .ok_or_else(|| Error::Tls(format!("no private key found in {path}")))
}
