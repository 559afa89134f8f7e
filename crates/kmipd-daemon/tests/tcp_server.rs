//! End-to-end tests for the framed TCP transport.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use common::{read_frame, request_for, roundtrip, start_default_tcp_server, start_tcp_server, write_frame};
use kmipd_core::error::ResultReason;
use kmipd_core::ttlv::tag;
use kmipd_core::{Operation, ResultStatus, Ttlv};
use kmipd_daemon::dispatch::{AuthorizationGate, CheckResponse};
use rustls::pki_types::CertificateDer;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[tokio::test]
async fn local_create_succeeds() -> Result<()> {
    let (addr, _server, _root) = start_default_tcp_server().await?;
    let mut stream = TcpStream::connect(addr).await?;

    let response = roundtrip(&mut stream, &request_for(&[Operation::CREATE])).await?;

    assert_eq!(response.header.batch_count, 1);
    assert_eq!(response.batch_items.len(), 1);
    let item = &response.batch_items[0];
    assert_eq!(item.operation, Operation::CREATE);
    assert_eq!(item.result_status, ResultStatus::Success);
    assert!(item.result_reason.is_none());
    assert_eq!(
        item.response_payload,
        Some(Ttlv::structure(tag::RESPONSE_PAYLOAD, Vec::new()))
    );
    Ok(())
}

#[tokio::test]
async fn unsupported_operation_fails_without_edge_mode() -> Result<()> {
    let (addr, _server, _root) = start_default_tcp_server().await?;
    let mut stream = TcpStream::connect(addr).await?;

    let response = roundtrip(&mut stream, &request_for(&[Operation::DESTROY])).await?;

    let item = &response.batch_items[0];
    assert_eq!(item.operation, Operation::DESTROY);
    assert_eq!(item.result_status, ResultStatus::OperationFailed);
    assert_eq!(item.result_reason, Some(ResultReason::OperationNotSupported));
    assert!(item.response_payload.is_none());
    Ok(())
}

#[tokio::test]
async fn oversized_frame_closes_the_connection_silently() -> Result<()> {
    let (addr, _server, _root) = start_default_tcp_server().await?;
    let mut stream = TcpStream::connect(addr).await?;

    // Header announcing 32 MiB; no response is owed, the server just
    // hangs up.
    let mut header = Vec::new();
    header.extend_from_slice(&0x0200u16.to_be_bytes());
    header.extend_from_slice(&0x0000u16.to_be_bytes());
    header.extend_from_slice(&0x0200_0000u32.to_be_bytes());
    stream.write_all(&header).await?;

    let mut buf = [0u8; 16];
    let read = stream.read(&mut buf).await;
    match read {
        Ok(0) => {}
        Ok(n) => panic!("expected the connection to close, read {n} bytes"),
        // A reset is also an acceptable way to observe the close.
        Err(_) => {}
    }
    Ok(())
}

#[tokio::test]
async fn garbage_payload_yields_invalid_message_response() -> Result<()> {
    let (addr, _server, _root) = start_default_tcp_server().await?;
    let mut stream = TcpStream::connect(addr).await?;

    write_frame(&mut stream, b"this is not ttlv").await?;
    let payload = read_frame(&mut stream).await?;
    let response = kmipd_core::ResponseMessage::from_ttlv_bytes(&payload)?;

    assert_eq!(response.header.protocol_version, kmipd_core::ProtocolVersion::V1_0);
    assert_eq!(response.batch_items.len(), 1);
    assert_eq!(
        response.batch_items[0].result_reason,
        Some(ResultReason::InvalidMessage)
    );

    // The server closes after the synthetic response.
    let mut buf = [0u8; 1];
    assert!(matches!(stream.read(&mut buf).await, Ok(0) | Err(_)));
    Ok(())
}

struct DenyCreateGate;

impl AuthorizationGate for DenyCreateGate {
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
async fn denied_operation_fails_with_permission_denied() -> Result<()> {
    let (addr, _server, _root) = start_tcp_server(Arc::new(DenyCreateGate)).await?;
    let mut stream = TcpStream::connect(addr).await?;

    let response = roundtrip(&mut stream, &request_for(&[Operation::CREATE])).await?;

    assert_eq!(response.batch_items.len(), 1);
    let item = &response.batch_items[0];
    assert_eq!(item.operation, Operation::CREATE);
    assert_eq!(item.result_status, ResultStatus::OperationFailed);
    assert_eq!(item.result_reason, Some(ResultReason::PermissionDenied));
    Ok(())
}

#[tokio::test]
async fn batch_items_keep_order_and_ids_across_one_connection() -> Result<()> {
    let (addr, _server, _root) = start_default_tcp_server().await?;
    let mut stream = TcpStream::connect(addr).await?;

    let request = request_for(&[
        Operation::CREATE,
        Operation::DISCOVER_VERSIONS,
        Operation::DESTROY,
    ]);
    let response = roundtrip(&mut stream, &request).await?;

    assert_eq!(response.header.batch_count, 3);
    for (request_item, response_item) in request.batch_items.iter().zip(&response.batch_items) {
        assert_eq!(request_item.operation, response_item.operation);
        assert_eq!(
            request_item.unique_batch_item_id,
            response_item.unique_batch_item_id
        );
    }

    // The connection stays usable for a second request.
    let again = roundtrip(&mut stream, &request_for(&[Operation::CREATE])).await?;
    assert_eq!(again.batch_items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_refuses_new_connections() -> Result<()> {
    let (addr, server, _root) = start_default_tcp_server().await?;

    // Prove the server was up.
    let mut stream = TcpStream::connect(addr).await?;
    let _ = roundtrip(&mut stream, &request_for(&[Operation::CREATE])).await?;
    drop(stream);

    server.shutdown().await;

    // Either the connect is refused outright, or the accepted-but-orphaned
    // socket yields EOF on read.
    match TcpStream::connect(addr).await {
        Err(_) => {}
        Ok(mut stream) => {
            write_frame(&mut stream, &request_for(&[Operation::CREATE]).to_ttlv_bytes()).await?;
            let mut buf = [0u8; 1];
            assert!(matches!(stream.read(&mut buf).await, Ok(0) | Err(_)));
        }
    }
    Ok(())
}
