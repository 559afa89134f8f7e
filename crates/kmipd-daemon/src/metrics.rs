//! Prometheus metrics for the KMIP transports.
//!
//! A deliberately small surface: accepted connections, handled requests and
//! proxied batch items. The `/metrics` endpoint binds to localhost by
//! default; front it with a scraper or reverse proxy if remote access is
//! needed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Shared handle over the transport metrics. Cloning is cheap; all clones
/// feed the same registry.
#[derive(Clone)]
pub struct ServerMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    connections_total: IntCounterVec,
    requests_total: IntCounterVec,
    proxied_items_total: IntCounter,
}

impl ServerMetrics {
    /// Creates the metric families and registers them.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Registration`] on a duplicate registration.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let connections_total = IntCounterVec::new(
            Opts::new("kmipd_connections_total", "Accepted connections"),
            &["transport"],
        )?;
        let requests_total = IntCounterVec::new(
            Opts::new("kmipd_requests_total", "Handled KMIP requests"),
            &["transport", "status"],
        )?;
        let proxied_items_total = IntCounter::new(
            "kmipd_proxied_batch_items_total",
            "Batch items delegated to the upstream endpoint",
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(proxied_items_total.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                connections_total,
                requests_total,
                proxied_items_total,
            }),
        })
    }

    pub fn connection_accepted(&self, transport: &str) {
        self.inner
            .connections_total
            .with_label_values(&[transport])
            .inc();
    }

    pub fn request_handled(&self, transport: &str, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.inner
            .requests_total
            .with_label_values(&[transport, status])
            .inc();
    }

    pub fn proxied_items(&self, count: usize) {
        self.inner.proxied_items_total.inc_by(count as u64);
    }

    /// Renders the registry in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Encoding`] if the encoder fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.inner.registry.gather(), &mut buf)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

/// Serves `GET /metrics` until the token fires.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve_metrics(
    addr: SocketAddr,
    metrics: ServerMetrics,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let handler = move || {
        let metrics = metrics.clone();
        async move {
            match metrics.encode_text() {
                Ok(body) => (
                    axum::http::StatusCode::OK,
                    [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                    body,
                )
                    .into_response(),
                Err(err) => {
                    error!(error = %err, "failed to encode metrics");
                    (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to encode metrics: {err}"),
                    )
                        .into_response()
                }
            }
        }
    };

    let app = Router::new().route("/metrics", get(handler));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
