//! Delegation of unsupported operations to an upstream KMIP endpoint.
//!
//! In edge mode, batch items with no local handler are re-assembled into a
//! request of their own and POSTed to the configured upstream as TTLV. The
//! incoming client's certificate chain rides along in the
//! `X-Client-Cert-Chain` header so the upstream can authorize the delegated
//! operations itself.

use kmipd_core::{CodecError, RequestMessage, ResponseMessage};
use reqwest::header::CONTENT_TYPE;

use crate::protocol::context::{encode_cert_chain_header, RequestContext, CLIENT_CERT_CHAIN_HEADER};

/// Errors from a proxy round-trip. The pipeline never propagates these
/// upward; they collapse into `GeneralFailure` batch items.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream response did not parse: {0}")]
    Decode(#[from] CodecError),
}

/// HTTP client for the upstream KMIP endpoint.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    endpoint: String,
    client: reqwest::Client,
}

impl ProxyClient {
    /// Builds a client for the given endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Http`] if the underlying client cannot be
    /// constructed.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProxyError> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder().build()?,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Forwards a request of delegated batch items and parses the upstream
    /// response.
    ///
    /// # Errors
    ///
    /// Returns a [`ProxyError`] if the POST fails at any stage: transport,
    /// non-success status, or an unparseable body.
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        request: &RequestMessage,
    ) -> Result<ResponseMessage, ProxyError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(request.to_ttlv_bytes());

        let client_certificates = ctx.connection.client_certificates();
        if !client_certificates.is_empty() {
            builder = builder.header(
                CLIENT_CERT_CHAIN_HEADER,
                encode_cert_chain_header(&client_certificates),
            );
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(ResponseMessage::from_ttlv_bytes(&body)?)
    }
}
