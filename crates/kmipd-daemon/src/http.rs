//! HTTP transport for KMIP.
//!
//! One POST endpoint. The request `Content-Type` picks the codec (TTLV,
//! JSON or XML); the response is encoded with the same codec and always
//! carries HTTP status 200 once the HTTP envelope itself is well-formed -
//! KMIP-level failures live in the message, not the status line.
//!
//! | Content-Type                                        | Codec |
//! |-----------------------------------------------------|-------|
//! | `application/octet-stream`, `application/vnd.kmip+ttl` | TTLV |
//! | `application/json`, `application/vnd.kmip+json`     | JSON  |
//! | `text/xml`, `application/vnd.kmip+xml`              | XML   |
//!
//! Envelope failures: 405 for non-POST, 415 for any other content type,
//! 411 for a missing or non-positive `Content-Length`, 400 for an oversize
//! declaration or a short body.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Router};
use futures::FutureExt;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use kmipd_core::error::ResultReason;
use kmipd_core::{KmipError, RequestMessage, ResponseMessage, ResultStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{listen_addr, HttpConfig};
use crate::dispatch::error_response;
use crate::metrics::ServerMetrics;
use crate::protocol::context::{ConnectionContext, RequestContext, TlsState};
use crate::protocol::server::RequestHandler;
use crate::tls;

/// The three content encodings of a KMIP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCodec {
    Ttlv,
    Json,
    Xml,
}

impl WireCodec {
    /// Maps a `Content-Type` value to its codec; parameters are ignored.
    #[must_use]
    pub fn from_content_type(value: &str) -> Option<Self> {
        match value.split(';').next().unwrap_or_default().trim() {
            "application/octet-stream" | "application/vnd.kmip+ttl" => Some(Self::Ttlv),
            "application/json" | "application/vnd.kmip+json" => Some(Self::Json),
            "text/xml" | "application/vnd.kmip+xml" => Some(Self::Xml),
            _ => None,
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<RequestMessage, kmipd_core::CodecError> {
        match self {
            Self::Ttlv => RequestMessage::from_ttlv_bytes(bytes),
            Self::Json => RequestMessage::from_json_bytes(bytes),
            Self::Xml => RequestMessage::from_xml_bytes(bytes),
        }
    }

    fn encode(self, response: &ResponseMessage) -> Vec<u8> {
        match self {
            Self::Ttlv => response.to_ttlv_bytes(),
            Self::Json => response.to_json_bytes(),
            Self::Xml => response.to_xml_bytes(),
        }
    }
}

/// Shared state of the HTTP endpoint.
#[derive(Clone)]
pub struct HttpState {
    handler: Arc<dyn RequestHandler>,
    max_body_size: usize,
    root: CancellationToken,
    metrics: Option<ServerMetrics>,
}

impl HttpState {
    #[must_use]
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        max_body_size: usize,
        root: CancellationToken,
        metrics: Option<ServerMetrics>,
    ) -> Self {
        Self {
            handler,
            max_body_size,
            root,
            metrics,
        }
    }
}

/// Identity of the connection a request arrived on, injected per
/// connection by the serve loop.
#[derive(Clone)]
pub struct PeerInfo {
    pub remote_addr: SocketAddr,
    pub tls: Option<TlsState>,
}

/// Builds the KMIP router: POST on the base path, everything else 405.
#[must_use]
pub fn router(base_path: &str, state: HttpState) -> Router {
    Router::new()
        .route(base_path, post(handle_kmip))
        .with_state(state)
}

async fn handle_kmip(
    State(state): State<HttpState>,
    Extension(peer): Extension<PeerInfo>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let headers = parts.headers;

    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
    else {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported Content-Type header",
        )
            .into_response();
    };
    let Some(codec) = WireCodec::from_content_type(&content_type) else {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported Content-Type header",
        )
            .into_response();
    };

    let Some(content_length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|length| *length > 0)
    else {
        return StatusCode::LENGTH_REQUIRED.into_response();
    };
    let content_length = content_length as usize;
    if content_length > state.max_body_size {
        return (StatusCode::BAD_REQUEST, "The request is too large").into_response();
    }

    let Ok(body) = axum::body::to_bytes(body, content_length).await else {
        return (
            StatusCode::BAD_REQUEST,
            "Amount of data differs from Content-Length",
        )
            .into_response();
    };
    if body.len() < content_length {
        return (
            StatusCode::BAD_REQUEST,
            "Amount of data is lower than Content-Length",
        )
            .into_response();
    }

    let connection = Arc::new(
        ConnectionContext::new(peer.remote_addr)
            .with_tls(peer.tls.clone())
            .with_http_headers(headers),
    );
    let ctx = RequestContext::new(Arc::clone(&connection), state.root.child_token());

    let response = match codec.decode(&body) {
        Ok(message) => dispatch(&state, &ctx, message).await,
        // Decode failure still answers 200 with a KMIP error response.
        Err(err) => error_response(&connection, None, &KmipError::invalid_message(err)),
    };

    if let Some(metrics) = &state.metrics {
        let success = response
            .batch_items
            .iter()
            .all(|item| item.result_status == ResultStatus::Success);
        metrics.request_handled("http", success);
    }

    (
        StatusCode::OK,
        [
            (header::ACCEPT, content_type.clone()),
            (header::CONTENT_TYPE, content_type),
        ],
        codec.encode(&response),
    )
        .into_response()
}

/// Panic barrier mirroring the TCP path.
async fn dispatch(
    state: &HttpState,
    ctx: &RequestContext,
    request: RequestMessage,
) -> ResponseMessage {
    let header = request.header.clone();
    match AssertUnwindSafe(state.handler.handle_request(ctx, request))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(_panic) => {
            error!(addr = %ctx.connection.remote_addr(), "request handler panicked");
            let shell = RequestMessage {
                header,
                batch_items: Vec::new(),
            };
            error_response(
                &ctx.connection,
                Some(&shell),
                &KmipError::new(ResultReason::IllegalOperation, ""),
            )
        }
    }
}

/// Serves the KMIP HTTP endpoint until the token fires.
///
/// Connections are accepted by hand (rather than through `axum::serve`) so
/// the TLS handshake state - the client certificate chain in particular -
/// can be captured and attached to every request.
///
/// # Errors
///
/// Returns an error when the address is invalid, the listener cannot bind,
/// or TLS material cannot be loaded.
pub async fn serve(
    config: &HttpConfig,
    handler: Arc<dyn RequestHandler>,
    metrics: Option<ServerMetrics>,
    root: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listen_addr(&config.address)?;
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, config, handler, metrics, root).await
}

/// [`serve`] on an already-bound listener.
///
/// # Errors
///
/// Returns an error when TLS material cannot be loaded.
pub async fn serve_on(
    listener: TcpListener,
    config: &HttpConfig,
    handler: Arc<dyn RequestHandler>,
    metrics: Option<ServerMetrics>,
    root: CancellationToken,
) -> anyhow::Result<()> {
    let acceptor = config
        .tls
        .as_ref()
        .map(tls::server_config)
        .transpose()?
        .map(TlsAcceptor::from);

    let state = HttpState::new(
        handler,
        config.effective_max_body_size(),
        root.clone(),
        metrics.clone(),
    );
    let app = router(&config.base_path, state);
    let header_timeout = config.read_header_timeout.map(Duration::from_secs);

    if let Ok(addr) = listener.local_addr() {
        info!(bind = %addr, path = %config.base_path, "KMIP HTTP server running");
    }

    loop {
        let accepted = tokio::select! {
            () = root.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        let (stream, remote_addr) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "HTTP accept failed");
                continue;
            }
        };

        if let Some(metrics) = &metrics {
            metrics.connection_accepted("http");
        }

        let app = app.clone();
        let acceptor = acceptor.clone();
        let conn_root = root.clone();
        tokio::spawn(async move {
            match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        let tls_state = {
                            let (_, connection) = tls_stream.get_ref();
                            TlsState {
                                peer_certificates: connection
                                    .peer_certificates()
                                    .map(<[_]>::to_vec)
                                    .unwrap_or_default(),
                                protocol_version: connection.protocol_version(),
                                cipher_suite: connection.negotiated_cipher_suite(),
                            }
                        };
                        serve_connection(
                            tls_stream,
                            remote_addr,
                            Some(tls_state),
                            app,
                            header_timeout,
                            conn_root,
                        )
                        .await;
                    }
                    Err(err) => {
                        warn!(addr = %remote_addr, error = %err, "TLS handshake failure");
                    }
                },
                None => {
                    serve_connection(stream, remote_addr, None, app, header_timeout, conn_root)
                        .await;
                }
            }
        });
    }
}

async fn serve_connection<S>(
    stream: S,
    remote_addr: SocketAddr,
    tls: Option<TlsState>,
    app: Router,
    header_timeout: Option<Duration>,
    root: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer = PeerInfo { remote_addr, tls };
    let service = TowerToHyperService::new(app.layer(Extension(peer)));

    let mut builder = ConnectionBuilder::new(TokioExecutor::new());
    {
        let mut http1 = builder.http1();
        http1.timer(TokioTimer::new());
        if let Some(timeout) = header_timeout {
            http1.header_read_timeout(timeout);
        }
    }

    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(err) = result {
                debug!(addr = %remote_addr, error = %err, "HTTP connection ended with error");
            }
        }
        () = root.cancelled() => {
            connection.as_mut().graceful_shutdown();
            let _ = connection.as_mut().await;
        }
    }
}
