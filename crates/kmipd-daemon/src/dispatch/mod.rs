//! Request dispatch: registry, authorization, pipeline, proxy delegation.
//!
//! The entry point is [`BatchExecutor`], the [`RequestHandler`] both
//! transports hand their decoded requests to. It partitions batch items
//! between local handlers and the upstream proxy, runs the authorization
//! gate, and assembles the response message.
//!
//! [`RequestHandler`]: crate::protocol::server::RequestHandler

pub mod authz;
pub mod pipeline;
pub mod proxy;
pub mod registry;

pub use authz::{AuthorizationGate, CertificateGate, CheckResponse};
use kmipd_core::{
    KmipError, Operation, ProtocolVersion, RequestMessage, ResponseBatchItem, ResponseHeader,
    ResponseMessage,
};
pub use pipeline::BatchExecutor;
pub use proxy::{ProxyClient, ProxyError};
pub use registry::OperationRegistry;
use tracing::error;

use crate::protocol::context::ConnectionContext;

/// Builds a failed batch item from an error, per the KMIP error mapping:
/// the ID placeholder is cleared, the reason comes from the error, and the
/// message text is surfaced only for well-known reasons - opaque failures
/// are logged server-side instead.
pub fn failed_item(
    connection: &ConnectionContext,
    operation: Operation,
    unique_batch_item_id: Option<Vec<u8>>,
    err: &KmipError,
) -> ResponseBatchItem {
    connection.clear_id_placeholder();

    let message = if err.is_well_known() {
        Some(err.to_string())
    } else {
        error!(reason = %err.reason(), error = %err, "KMIP batch item error");
        None
    };

    ResponseBatchItem::failure(operation, unique_batch_item_id, err.reason(), message)
}

/// Synthesizes a whole response message for a request that never reached
/// dispatch (for example one that failed to decode). The header echoes the
/// request's protocol version and correlation values when a request is
/// available and defaults to protocol version 1.0 otherwise.
pub fn error_response(
    connection: &ConnectionContext,
    request: Option<&RequestMessage>,
    err: &KmipError,
) -> ResponseMessage {
    let mut header = ResponseHeader::now(ProtocolVersion::V1_0, 1);
    if let Some(request) = request {
        if let Some(version) = request.header.protocol_version {
            header.protocol_version = version;
        }
        header
            .client_correlation_value
            .clone_from(&request.header.client_correlation_value);
        header
            .server_correlation_value
            .clone_from(&request.header.server_correlation_value);
    }

    ResponseMessage {
        header,
        batch_items: vec![failed_item(connection, Operation(0), None, err)],
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use kmipd_core::error::ResultReason;
    use kmipd_core::{RequestBatchItem, RequestHeader, ResultStatus};

    use super::*;

    fn connection() -> ConnectionContext {
        let addr: SocketAddr = "127.0.0.1:5696".parse().unwrap();
        ConnectionContext::new(addr)
    }

    #[test]
    fn failed_item_clears_placeholder_and_maps_reason() {
        let conn = connection();
        conn.set_id_placeholder("key-1");

        let item = failed_item(
            &conn,
            Operation::CREATE,
            Some(vec![1]),
            &KmipError::operation_not_supported(),
        );
        assert_eq!(conn.id_placeholder(), None);
        assert_eq!(item.result_status, ResultStatus::OperationFailed);
        assert_eq!(item.result_reason, Some(ResultReason::OperationNotSupported));
        assert_eq!(item.result_message.as_deref(), Some("Operation not supported"));
        assert!(item.response_payload.is_none());
    }

    #[test]
    fn opaque_errors_omit_the_message() {
        let item = failed_item(
            &connection(),
            Operation::CREATE,
            None,
            &KmipError::general("disk on fire"),
        );
        assert_eq!(item.result_reason, Some(ResultReason::GeneralFailure));
        assert_eq!(item.result_message, None);
    }

    #[test]
    fn error_response_defaults_to_v1_0() {
        let resp = error_response(
            &connection(),
            None,
            &KmipError::invalid_message("unparseable"),
        );
        assert_eq!(resp.header.protocol_version, ProtocolVersion::V1_0);
        assert_eq!(resp.header.batch_count, 1);
        assert_eq!(resp.batch_items.len(), 1);
        assert_eq!(
            resp.batch_items[0].result_reason,
            Some(ResultReason::InvalidMessage)
        );
    }

    #[test]
    fn error_response_echoes_request_header() {
        let request = RequestMessage {
            header: RequestHeader {
                protocol_version: Some(ProtocolVersion::V2_0),
                client_correlation_value: Some("corr-9".into()),
                server_correlation_value: None,
                batch_count: 1,
            },
            batch_items: vec![RequestBatchItem::new(Operation::GET)],
        };
        let resp = error_response(
            &connection(),
            Some(&request),
            &KmipError::invalid_message("bad"),
        );
        assert_eq!(resp.header.protocol_version, ProtocolVersion::V2_0);
        assert_eq!(resp.header.client_correlation_value.as_deref(), Some("corr-9"));
    }
}
