//! The request-processing pipeline.
//!
//! For every request message: partition batch items between local handlers
//! and the upstream proxy, authorize the local operations, dispatch them in
//! declared order, forward the delegated remainder, and assemble a response
//! whose items line up one-to-one (order and `UniqueBatchItemID`) with the
//! request - local items first, delegated items after.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use kmipd_core::error::ResultReason;
use kmipd_core::{
    KmipError, ProtocolVersion, RequestBatchItem, RequestHeader, RequestMessage,
    ResponseBatchItem, ResponseHeader, ResponseMessage,
};
use tracing::warn;

use super::authz::AuthorizationGate;
use super::failed_item;
use super::proxy::ProxyClient;
use super::registry::OperationRegistry;
use crate::metrics::ServerMetrics;
use crate::protocol::context::RequestContext;
use crate::protocol::server::RequestHandler;
use crate::services::Services;

/// The server's request handler: authorization, per-item dispatch, proxy
/// delegation, and response assembly.
pub struct BatchExecutor {
    registry: Arc<OperationRegistry>,
    services: Services,
    authz: Arc<dyn AuthorizationGate>,
    proxy: Option<ProxyClient>,
    metrics: Option<ServerMetrics>,
}

impl BatchExecutor {
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        services: Services,
        authz: Arc<dyn AuthorizationGate>,
    ) -> Self {
        Self {
            registry,
            services,
            authz,
            proxy: None,
            metrics: None,
        }
    }

    /// Enables edge mode: batch items with no local handler are forwarded
    /// to this upstream instead of failing with `OperationNotSupported`.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyClient) -> Self {
        self.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: ServerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn assemble(request: &RequestMessage, items: Vec<ResponseBatchItem>) -> ResponseMessage {
        let mut header = ResponseHeader::now(
            request
                .header
                .protocol_version
                .unwrap_or(ProtocolVersion::V1_0),
            items.len() as i32,
        );
        header
            .client_correlation_value
            .clone_from(&request.header.client_correlation_value);
        header
            .server_correlation_value
            .clone_from(&request.header.server_correlation_value);

        ResponseMessage {
            header,
            batch_items: items,
        }
    }

    async fn delegate(
        &self,
        ctx: &RequestContext,
        request: &RequestMessage,
        delegated: Vec<RequestBatchItem>,
        items: &mut Vec<ResponseBatchItem>,
    ) {
        let Some(proxy) = &self.proxy else {
            return;
        };
        if delegated.is_empty() {
            return;
        }

        if let Some(metrics) = &self.metrics {
            metrics.proxied_items(delegated.len());
        }

        let sub_request = RequestMessage {
            header: RequestHeader {
                protocol_version: request.header.protocol_version,
                client_correlation_value: request.header.client_correlation_value.clone(),
                server_correlation_value: request.header.server_correlation_value.clone(),
                batch_count: delegated.len() as i32,
            },
            batch_items: delegated,
        };

        match proxy.forward(ctx, &sub_request).await {
            Ok(upstream) => items.extend(upstream.batch_items),
            Err(err) => {
                // The upstream failure never propagates; each delegated item
                // fails individually.
                warn!(endpoint = proxy.endpoint(), error = %err, "proxy delegation failed");
                for item in &sub_request.batch_items {
                    items.push(ResponseBatchItem::failure(
                        item.operation,
                        item.unique_batch_item_id.clone(),
                        ResultReason::GeneralFailure,
                        None,
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler for BatchExecutor {
    async fn handle_request(&self, ctx: &RequestContext, request: RequestMessage) -> ResponseMessage {
        let edge_mode = self.proxy.is_some();

        // Partition. In edge mode an item is delegated iff no local handler
        // resolves; otherwise every item is local.
        let mut delegated = Vec::new();
        let mut local_ops = Vec::new();
        for item in &request.batch_items {
            if edge_mode && self.registry.lookup(item.operation).is_none() {
                delegated.push(item.clone());
            } else {
                local_ops.push(item.operation);
            }
        }

        // Authorize the local operations only; the upstream owns
        // authorization of delegated ones.
        if !local_ops.is_empty() {
            let certificates = ctx.connection.client_certificates();
            let check = self.authz.authorize(&certificates, &local_ops);
            if check.failed() {
                let mut items = Vec::new();
                for item in &request.batch_items {
                    if check.decision(item.operation) == Some(false) {
                        items.push(failed_item(
                            &ctx.connection,
                            item.operation,
                            item.unique_batch_item_id.clone(),
                            &KmipError::permission_denied(),
                        ));
                    }
                }
                return Self::assemble(&request, items);
            }
        }

        // Local dispatch, in declared order. A handler failure aborts the
        // remaining local items and returns what has been built.
        let mut items = Vec::new();
        for item in &request.batch_items {
            let Some(handler) = self.registry.lookup(item.operation) else {
                if edge_mode {
                    continue;
                }
                items.push(failed_item(
                    &ctx.connection,
                    item.operation,
                    item.unique_batch_item_id.clone(),
                    &KmipError::operation_not_supported(),
                ));
                continue;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                handler.execute(ctx, &self.services, &item.request_payload)
            }));

            match outcome {
                Ok(Ok(payload)) => items.push(ResponseBatchItem::success(
                    item.operation,
                    item.unique_batch_item_id.clone(),
                    payload,
                )),
                Ok(Err(err)) => {
                    ctx.connection.clear_id_placeholder();
                    items.push(ResponseBatchItem::failure(
                        item.operation,
                        item.unique_batch_item_id.clone(),
                        ResultReason::IllegalOperation,
                        Some(err.to_string()),
                    ));
                    return Self::assemble(&request, items);
                }
                Err(_panic) => {
                    ctx.connection.clear_id_placeholder();
                    warn!(operation = %item.operation, "operation handler panicked");
                    items.push(ResponseBatchItem::failure(
                        item.operation,
                        item.unique_batch_item_id.clone(),
                        ResultReason::IllegalOperation,
                        None,
                    ));
                    return Self::assemble(&request, items);
                }
            }
        }

        // Delegated items execute after all local items and keep their
        // position at the tail of the response.
        self.delegate(ctx, &request, delegated, &mut items).await;

        Self::assemble(&request, items)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::net::SocketAddr;

    use kmipd_core::ttlv::tag;
    use kmipd_core::{Operation, ResultStatus, Ttlv};
    use rustls::pki_types::CertificateDer;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::Config;
    use crate::dispatch::authz::{CertificateGate, CheckResponse};
    use crate::operations::{default_handlers, HandlerTable, OperationHandler};
    use crate::protocol::context::ConnectionContext;

    fn request_context() -> RequestContext {
        let addr: SocketAddr = "127.0.0.1:5696".parse().unwrap();
        RequestContext::new(
            Arc::new(ConnectionContext::new(addr)),
            CancellationToken::new(),
        )
    }

    fn executor() -> BatchExecutor {
        BatchExecutor::new(
            Arc::new(OperationRegistry::new()),
            Services::new(Arc::new(Config::default())),
            Arc::new(CertificateGate::new()),
        )
    }

    fn request(items: Vec<RequestBatchItem>) -> RequestMessage {
        RequestMessage {
            header: RequestHeader {
                protocol_version: Some(ProtocolVersion::V1_4),
                client_correlation_value: None,
                server_correlation_value: None,
                batch_count: items.len() as i32,
            },
            batch_items: items,
        }
    }

    #[tokio::test]
    async fn local_create_succeeds_with_empty_payload() {
        let resp = executor()
            .handle_request(
                &request_context(),
                request(vec![RequestBatchItem::new(Operation::CREATE)]),
            )
            .await;

        assert_eq!(resp.header.batch_count, 1);
        assert_eq!(resp.batch_items.len(), 1);
        let item = &resp.batch_items[0];
        assert_eq!(item.operation, Operation::CREATE);
        assert_eq!(item.result_status, ResultStatus::Success);
        assert!(item.result_reason.is_none());
        assert_eq!(
            item.response_payload,
            Some(Ttlv::structure(tag::RESPONSE_PAYLOAD, Vec::new()))
        );
    }

    #[tokio::test]
    async fn unsupported_operation_fails_without_edge_mode() {
        let resp = executor()
            .handle_request(
                &request_context(),
                request(vec![RequestBatchItem::new(Operation::DESTROY)]),
            )
            .await;

        let item = &resp.batch_items[0];
        assert_eq!(item.operation, Operation::DESTROY);
        assert_eq!(item.result_status, ResultStatus::OperationFailed);
        assert_eq!(item.result_reason, Some(ResultReason::OperationNotSupported));
        assert!(item.response_payload.is_none());
    }

    #[tokio::test]
    async fn response_items_mirror_request_order_and_ids() {
        let resp = executor()
            .handle_request(
                &request_context(),
                request(vec![
                    RequestBatchItem::new(Operation::CREATE).with_id(vec![0x0A]),
                    RequestBatchItem::new(Operation::DISCOVER_VERSIONS).with_id(vec![0x0B]),
                    RequestBatchItem::new(Operation::DESTROY).with_id(vec![0x0C]),
                ]),
            )
            .await;

        assert_eq!(resp.header.batch_count, 3);
        let ids: Vec<_> = resp
            .batch_items
            .iter()
            .map(|i| i.unique_batch_item_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec![vec![0x0A], vec![0x0B], vec![0x0C]]);
    }

    struct DenyGate;

    impl AuthorizationGate for DenyGate {
        fn authorize(
            &self,
            _certs: &[CertificateDer<'static>],
            operations: &[Operation],
        ) -> CheckResponse {
            CheckResponse::new(operations.iter().map(|op| (*op, false)).collect())
        }
    }

    #[tokio::test]
    async fn denied_operations_fail_with_permission_denied() {
        let executor = BatchExecutor::new(
            Arc::new(OperationRegistry::new()),
            Services::new(Arc::new(Config::default())),
            Arc::new(DenyGate),
        );

        let ctx = request_context();
        ctx.connection.set_id_placeholder("key-1");
        let resp = executor
            .handle_request(&ctx, request(vec![RequestBatchItem::new(Operation::CREATE)]))
            .await;

        let item = &resp.batch_items[0];
        assert_eq!(item.result_status, ResultStatus::OperationFailed);
        assert_eq!(item.result_reason, Some(ResultReason::PermissionDenied));
        assert!(item.response_payload.is_none());
        // The ID placeholder is cleared by the failure.
        assert_eq!(ctx.connection.id_placeholder(), None);
    }

    struct EmptyGate;

    impl AuthorizationGate for EmptyGate {
        fn authorize(
            &self,
            _certs: &[CertificateDer<'static>],
            _operations: &[Operation],
        ) -> CheckResponse {
            CheckResponse::default()
        }
    }

    #[tokio::test]
    async fn empty_check_response_denies_with_no_items() {
        let executor = BatchExecutor::new(
            Arc::new(OperationRegistry::new()),
            Services::new(Arc::new(Config::default())),
            Arc::new(EmptyGate),
        );

        // Fail-closed: nothing is dispatched, and since no per-op decision
        // exists, no denial item is emitted either.
        let resp = executor
            .handle_request(
                &request_context(),
                request(vec![RequestBatchItem::new(Operation::CREATE)]),
            )
            .await;
        assert!(resp.batch_items.is_empty());
        assert_eq!(resp.header.batch_count, 0);
    }

    struct PanickingHandler;

    impl OperationHandler for PanickingHandler {
        fn operation(&self) -> Operation {
            Operation::GET
        }

        fn execute(
            &self,
            _ctx: &RequestContext,
            _services: &Services,
            _payload: &Ttlv,
        ) -> kmipd_core::KmipResult<Ttlv> {
            panic!("handler defect");
        }
    }

    struct FailingHandler;

    impl OperationHandler for FailingHandler {
        fn operation(&self) -> Operation {
            Operation::ACTIVATE
        }

        fn execute(
            &self,
            _ctx: &RequestContext,
            _services: &Services,
            _payload: &Ttlv,
        ) -> kmipd_core::KmipResult<Ttlv> {
            Err(KmipError::item_not_found("no such key"))
        }
    }

    fn executor_with_extra_handlers() -> BatchExecutor {
        let mut table: HandlerTable = default_handlers().clone();
        let extra: Vec<Arc<dyn OperationHandler>> =
            vec![Arc::new(PanickingHandler), Arc::new(FailingHandler)];
        table.extend(extra.into_iter().map(|h| (h.operation(), h)));

        BatchExecutor::new(
            Arc::new(OperationRegistry::from_table(table)),
            Services::new(Arc::new(Config::default())),
            Arc::new(CertificateGate::new()),
        )
    }

    #[tokio::test]
    async fn panicking_handler_becomes_illegal_operation_item() {
        let resp = executor_with_extra_handlers()
            .handle_request(
                &request_context(),
                request(vec![RequestBatchItem::new(Operation::GET)]),
            )
            .await;

        let item = &resp.batch_items[0];
        assert_eq!(item.result_status, ResultStatus::OperationFailed);
        assert_eq!(item.result_reason, Some(ResultReason::IllegalOperation));
        assert_eq!(item.result_message, None);
    }

    #[tokio::test]
    async fn handler_error_aborts_remaining_local_dispatch() {
        let resp = executor_with_extra_handlers()
            .handle_request(
                &request_context(),
                request(vec![
                    RequestBatchItem::new(Operation::CREATE),
                    RequestBatchItem::new(Operation::ACTIVATE),
                    RequestBatchItem::new(Operation::CREATE),
                ]),
            )
            .await;

        // Create succeeded, Activate failed, and the trailing Create was
        // never dispatched.
        assert_eq!(resp.batch_items.len(), 2);
        assert_eq!(resp.header.batch_count, 2);
        assert_eq!(resp.batch_items[0].result_status, ResultStatus::Success);
        let failed = &resp.batch_items[1];
        assert_eq!(failed.result_reason, Some(ResultReason::IllegalOperation));
        assert_eq!(failed.result_message.as_deref(), Some("Item not found: no such key"));
    }

    struct OneDenyGate;

    impl AuthorizationGate for OneDenyGate {
        fn authorize(
            &self,
            _certs: &[CertificateDer<'static>],
            operations: &[Operation],
        ) -> CheckResponse {
            let decisions: BTreeMap<Operation, bool> = operations
                .iter()
                .map(|op| (*op, *op != Operation::CREATE))
                .collect();
            CheckResponse::new(decisions)
        }
    }

    #[tokio::test]
    async fn only_denied_operations_receive_items() {
        let executor = BatchExecutor::new(
            Arc::new(OperationRegistry::new()),
            Services::new(Arc::new(Config::default())),
            Arc::new(OneDenyGate),
        );

        let resp = executor
            .handle_request(
                &request_context(),
                request(vec![
                    RequestBatchItem::new(Operation::DISCOVER_VERSIONS).with_id(vec![1]),
                    RequestBatchItem::new(Operation::CREATE).with_id(vec![2]),
                ]),
            )
            .await;

        assert_eq!(resp.batch_items.len(), 1);
        assert_eq!(resp.batch_items[0].operation, Operation::CREATE);
        assert_eq!(
            resp.batch_items[0].result_reason,
            Some(ResultReason::PermissionDenied)
        );
    }
}
