//! Connection-scoped state threaded through request handling.
//!
//! The [`ConnectionContext`] is an explicit value bag, not an ambient: the
//! server builds one per connection (the HTTP transport builds one per
//! request) and hands it down through the pipeline to operation handlers.
//! It carries the peer identity (address, TLS state, HTTP headers) and the
//! mutable KMIP ID placeholder used by chained batch operations.

use std::net::SocketAddr;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hyper::header::HeaderMap;
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Request header carrying a JSON-encoded client certificate chain when TLS
/// is terminated before this hop.
pub const CLIENT_CERT_CHAIN_HEADER: &str = "X-Client-Cert-Chain";

/// TLS state captured after a completed handshake. Read-only from then on.
#[derive(Debug, Clone)]
pub struct TlsState {
    pub peer_certificates: Vec<CertificateDer<'static>>,
    pub protocol_version: Option<rustls::ProtocolVersion>,
    pub cipher_suite: Option<rustls::SupportedCipherSuite>,
}

/// Per-connection state bag.
#[derive(Debug)]
pub struct ConnectionContext {
    remote_addr: SocketAddr,
    tls: Option<TlsState>,
    http_headers: Option<HeaderMap>,
    /// Identifier of the most recently created object, shared by chained
    /// batch items. Cleared whenever a batch item fails.
    id_placeholder: Mutex<Option<String>>,
}

impl ConnectionContext {
    #[must_use]
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            tls: None,
            http_headers: None,
            id_placeholder: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsState>) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_http_headers(mut self, headers: HeaderMap) -> Self {
        self.http_headers = Some(headers);
        self
    }

    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    #[must_use]
    pub const fn tls_state(&self) -> Option<&TlsState> {
        self.tls.as_ref()
    }

    #[must_use]
    pub const fn http_headers(&self) -> Option<&HeaderMap> {
        self.http_headers.as_ref()
    }

    /// Certificates identifying the client: the TLS peer chain when one was
    /// presented, otherwise whatever a fronting hop forwarded in the
    /// `X-Client-Cert-Chain` header.
    #[must_use]
    pub fn client_certificates(&self) -> Vec<CertificateDer<'static>> {
        if let Some(tls) = &self.tls {
            if !tls.peer_certificates.is_empty() {
                return tls.peer_certificates.clone();
            }
        }
        self.http_headers
            .as_ref()
            .and_then(|headers| headers.get(CLIENT_CERT_CHAIN_HEADER))
            .and_then(|value| value.to_str().ok())
            .map(decode_cert_chain_header)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn id_placeholder(&self) -> Option<String> {
        self.id_placeholder.lock().expect("placeholder lock").clone()
    }

    pub fn set_id_placeholder(&self, id: impl Into<String>) {
        *self.id_placeholder.lock().expect("placeholder lock") = Some(id.into());
    }

    pub fn clear_id_placeholder(&self) {
        *self.id_placeholder.lock().expect("placeholder lock") = None;
    }
}

/// Per-request view: the connection state plus the cancellation token that
/// cuts in-flight handlers off at root shutdown.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub connection: std::sync::Arc<ConnectionContext>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(connection: std::sync::Arc<ConnectionContext>, cancel: CancellationToken) -> Self {
        Self { connection, cancel }
    }
}

/// Wire form of the `X-Client-Cert-Chain` header.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CertChain {
    /// Certificates, leaf first. Entries are either PEM blocks or bare
    /// base64-encoded DER.
    pub chain: Vec<String>,
}

/// Serializes a certificate chain into the header value.
#[must_use]
pub fn encode_cert_chain_header(certs: &[CertificateDer<'static>]) -> String {
    let chain = CertChain {
        chain: certs.iter().map(|c| BASE64.encode(c.as_ref())).collect(),
    };
    serde_json::to_string(&chain).expect("chain of strings always serializes")
}

/// Parses a header value back into DER certificates. Entries that fail to
/// parse are skipped; identity is re-checked by the authorization gate, so a
/// mangled entry only narrows what the client can prove.
#[must_use]
pub fn decode_cert_chain_header(value: &str) -> Vec<CertificateDer<'static>> {
    let Ok(chain) = serde_json::from_str::<CertChain>(value) else {
        return Vec::new();
    };

    let mut certs = Vec::new();
    for entry in &chain.chain {
        if entry.contains("BEGIN CERTIFICATE") {
            let mut reader = std::io::BufReader::new(entry.as_bytes());
            for cert in rustls_pemfile::certs(&mut reader).flatten() {
                certs.push(cert);
            }
        } else if let Ok(der) = BASE64.decode(entry.trim()) {
            certs.push(CertificateDer::from(der));
        }
    }
    certs
}
