//! TCP listener/server: accept loop, per-connection tasks, TLS handshake,
//! connect/terminate hooks, and two-phase graceful shutdown.
//!
//! # Shutdown
//!
//! The server runs under three nested cancellation tokens:
//!
//! - **root**: cancelled at final shutdown; cuts off in-flight handlers and
//!   writes.
//! - **receive**: child of root, cancelled at the *start* of shutdown; stops
//!   the accept loop and forbids new request reads while current handlers
//!   drain.
//! - **per-request**: child of root, carried in the [`RequestContext`].
//!
//! [`Server::shutdown`] cancels the receive token, arms a grace timer that
//! cancels root if connections have not drained in time, then waits for all
//! connection tasks.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use kmipd_core::error::ResultReason;
use kmipd_core::{KmipError, RequestMessage, ResponseMessage, ResultStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::context::{ConnectionContext, RequestContext, TlsState};
use super::stream::{KmipStream, StreamError};
use crate::dispatch::error_response;
use crate::metrics::ServerMetrics;

/// Time between the start of shutdown and the forced root cancellation.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Handler for decoded KMIP requests. Implemented by
/// [`crate::dispatch::BatchExecutor`]; tests substitute their own.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Processes one request message into a response message. Must not
    /// fail: protocol-level errors belong in the response's batch items.
    async fn handle_request(&self, ctx: &RequestContext, request: RequestMessage)
        -> ResponseMessage;
}

/// Runs when a connection is established, before any request is read. May
/// replace the connection context; an error aborts the connection without
/// the terminate hook firing.
pub type ConnectHook =
    Box<dyn Fn(ConnectionContext) -> anyhow::Result<ConnectionContext> + Send + Sync>;

/// Runs once per connection after its receive loop ends.
pub type TerminateHook = Box<dyn Fn(&ConnectionContext) + Send + Sync>;

/// Errors from server construction and the serve loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The serve loop stopped because shutdown was requested.
    #[error("server is shutting down")]
    Shutdown,

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("listener is not configured")]
    MissingListener,

    #[error("request handler is not configured")]
    MissingHandler,
}

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    tls: Option<TlsAcceptor>,
    handler: Option<Arc<dyn RequestHandler>>,
    connect_hook: Option<ConnectHook>,
    terminate_hook: Option<TerminateHook>,
    metrics: Option<ServerMetrics>,
}

impl ServerBuilder {
    #[must_use]
    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Enables TLS: every accepted connection is handshaken before the
    /// first frame is read.
    #[must_use]
    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(TlsAcceptor::from(config));
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_connect_hook(mut self, hook: ConnectHook) -> Self {
        self.connect_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn with_terminate_hook(mut self, hook: TerminateHook) -> Self {
        self.terminate_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: ServerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the configuration and builds the server. The server's root
    /// token is a child of `parent`, so cancelling `parent` is equivalent to
    /// a hard stop.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingListener`] or
    /// [`ServerError::MissingHandler`] when a required part is absent.
    pub fn build(self, parent: &CancellationToken) -> Result<Server, ServerError> {
        let listener = self.listener.ok_or(ServerError::MissingListener)?;
        let handler = self.handler.ok_or(ServerError::MissingHandler)?;

        let root = parent.child_token();
        let recv = root.child_token();

        Ok(Server {
            listener: Mutex::new(Some(listener)),
            tracker: TaskTracker::new(),
            shared: Arc::new(Shared {
                handler,
                tls: self.tls,
                connect_hook: self.connect_hook,
                terminate_hook: self.terminate_hook,
                metrics: self.metrics,
                root,
                recv,
            }),
        })
    }
}

struct Shared {
    handler: Arc<dyn RequestHandler>,
    tls: Option<TlsAcceptor>,
    connect_hook: Option<ConnectHook>,
    terminate_hook: Option<TerminateHook>,
    metrics: Option<ServerMetrics>,
    root: CancellationToken,
    recv: CancellationToken,
}

/// A KMIP TCP server bound to one listener and one request handler.
pub struct Server {
    listener: Mutex<Option<TcpListener>>,
    tracker: TaskTracker,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Accepts connections until shutdown, spawning one task per
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Shutdown`] when the accept loop was stopped by
    /// [`Server::shutdown`], or [`ServerError::Accept`] on a fatal accept
    /// failure.
    pub async fn serve(&self) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .expect("listener lock poisoned")
            .take()
            .ok_or(ServerError::Shutdown)?;

        if let Ok(addr) = listener.local_addr() {
            info!(bind = %addr, "KMIP server running");
        }

        loop {
            // Returning drops the listener, which is the moment new
            // connections stop being accepted.
            let accepted = tokio::select! {
                () = self.shared.recv.cancelled() => return Err(ServerError::Shutdown),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Some(metrics) = &self.shared.metrics {
                        metrics.connection_accepted("tcp");
                    }
                    let shared = Arc::clone(&self.shared);
                    self.tracker.spawn(async move {
                        shared.handle_conn(stream, peer).await;
                    });
                }
                Err(err) => return Err(ServerError::Accept(err)),
            }
        }
    }

    /// Two-phase graceful shutdown:
    ///
    /// 1. Cancel the receive token - the accept loop stops and no further
    ///    request reads begin.
    /// 2. Arm the grace timer; if it fires, the root token is cancelled,
    ///    cutting off in-flight handlers.
    /// 3. Wait for all connection tasks to finish.
    /// 4. Cancel the root token (idempotent) and return.
    pub async fn shutdown(&self) {
        self.shared.recv.cancel();
        self.tracker.close();

        let root = self.shared.root.clone();
        let force = tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            root.cancel();
        });

        self.tracker.wait().await;
        force.abort();
        self.shared.root.cancel();
    }
}

impl Shared {
    async fn handle_conn(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        info!(addr = %peer, "connection established");

        match &self.tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let state = {
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
                    let ctx = ConnectionContext::new(peer).with_tls(Some(state));
                    self.run_stream(KmipStream::new(tls_stream), ctx).await;
                }
                Err(err) => {
                    warn!(addr = %peer, error = %err, "TLS handshake failure");
                }
            },
            None => {
                self.run_stream(KmipStream::new(stream), ConnectionContext::new(peer))
                    .await;
            }
        }
    }

    async fn run_stream<S>(&self, mut stream: KmipStream<S>, ctx: ConnectionContext)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = ctx.remote_addr();

        let ctx = match &self.connect_hook {
            Some(hook) => match hook(ctx) {
                Ok(ctx) => ctx,
                Err(err) => {
                    warn!(addr = %peer, error = %err, "connect hook aborted connection");
                    return;
                }
            },
            None => ctx,
        };
        let ctx = Arc::new(ctx);

        loop {
            let request = match stream.recv(&self.recv).await {
                Ok(request) => request,
                Err(StreamError::Eof) => {
                    info!(addr = %peer, "client closed connection");
                    break;
                }
                Err(StreamError::Cancelled) => break,
                Err(StreamError::Decode(err)) => {
                    error!(addr = %peer, error = %err, "failed to read from client");
                    // The frame arrived but its payload did not parse:
                    // answer with a KMIP error response, then close.
                    let response =
                        error_response(&ctx, None, &KmipError::invalid_message(&err));
                    let _ = stream.send(&response, &self.root).await;
                    break;
                }
                Err(err) => {
                    error!(addr = %peer, error = %err, "failed to read from client");
                    break;
                }
            };

            let request_ctx = RequestContext::new(Arc::clone(&ctx), self.root.child_token());
            let response = self.dispatch(&request_ctx, request).await;

            if self.root.is_cancelled() {
                warn!(addr = %peer, "request aborted by shutdown");
                break;
            }

            if let Some(metrics) = &self.metrics {
                metrics.request_handled("tcp", response_succeeded(&response));
            }

            if let Err(err) = stream.send(&response, &self.root).await {
                warn!(addr = %peer, error = %err, "failed sending response");
                break;
            }
        }

        if let Some(hook) = &self.terminate_hook {
            hook(&ctx);
        }
    }

    /// Panic barrier: a panicking handler produces a well-formed
    /// `IllegalOperation` response instead of killing the connection.
    async fn dispatch(&self, ctx: &RequestContext, request: RequestMessage) -> ResponseMessage {
        let header = request.header.clone();
        match AssertUnwindSafe(self.handler.handle_request(ctx, request))
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
}

fn response_succeeded(response: &ResponseMessage) -> bool {
    response
        .batch_items
        .iter()
        .all(|item| item.result_status == ResultStatus::Success)
}
