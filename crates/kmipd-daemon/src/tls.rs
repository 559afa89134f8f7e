//! TLS credential materialization.
//!
//! Turns the PEM paths from [`TlsConfig`] into a rustls server
//! configuration. Presence of a client CA enables mutual TLS: clients must
//! present a chain that verifies against it, and the verified chain becomes
//! the connection's identity for the authorization gate.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

use crate::config::TlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read TLS material: {0}")]
    Io(#[from] std::io::Error),

    #[error("no certificate found in certificate file")]
    NoCertificate,

    #[error("no private key found in key file")]
    NoPrivateKey,

    #[error("client CA could not be loaded")]
    BadClientCa,

    #[error("client verifier: {0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Builds the server-side TLS configuration from PEM files.
///
/// # Errors
///
/// Returns a [`TlsError`] when a file is unreadable, contains no usable
/// material, or rustls rejects the combination.
pub fn server_config(config: &TlsConfig) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let certs = read_certs(&config.cert_file)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }

    let key = read_private_key(&config.key_file)?;

    let builder = match &config.client_ca_file {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for cert in read_certs(ca_file)? {
                roots.add(cert).map_err(|_| TlsError::BadClientCa)?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;
            rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => rustls::ServerConfig::builder().with_no_client_auth(),
    };

    Ok(Arc::new(builder.with_single_cert(certs, key)?))
}

fn read_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Io)
}

fn read_private_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or(TlsError::NoPrivateKey)
}
