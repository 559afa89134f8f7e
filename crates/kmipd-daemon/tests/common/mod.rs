//! Shared helpers for the end-to-end server tests.
//!
//! The helpers start real servers on loopback ports and drive them with a
//! minimal raw KMIP client: frames are written and read by hand so the
//! tests exercise the server's transport exactly as a foreign client would.

// Not every test crate uses every helper.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use kmipd_core::{Operation, ProtocolVersion, RequestBatchItem, RequestHeader, RequestMessage, ResponseMessage};
use kmipd_daemon::config::Config;
use kmipd_daemon::dispatch::{AuthorizationGate, BatchExecutor, CertificateGate, OperationRegistry};
use kmipd_daemon::protocol::Server;
use kmipd_daemon::services::Services;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// A TCP server over the default registry and gate, bound to an ephemeral
/// loopback port. Returns the bound address, the server handle, and its
/// root token.
pub async fn start_tcp_server(
    authz: Arc<dyn AuthorizationGate>,
) -> Result<(SocketAddr, Arc<Server>, CancellationToken)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let executor = BatchExecutor::new(
        Arc::new(OperationRegistry::new()),
        Services::new(Arc::new(Config::default())),
        authz,
    );

    let root = CancellationToken::new();
    let server = Arc::new(
        Server::builder()
            .with_listener(listener)
            .with_handler(Arc::new(executor))
            .build(&root)?,
    );

    let serve_server = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serve_server.serve().await;
    });

    Ok((addr, server, root))
}

/// Default permissive server.
pub async fn start_default_tcp_server() -> Result<(SocketAddr, Arc<Server>, CancellationToken)> {
    start_tcp_server(Arc::new(CertificateGate::new())).await
}

/// Writes one KMIP frame: 8-byte header then payload.
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let total = 8 + payload.len();
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&0x0200u16.to_be_bytes());
    frame.extend_from_slice(&0x0000u16.to_be_bytes());
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await?;
    Ok(())
}

/// Reads one KMIP frame, returning its payload.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut header = [0u8; 8];
    stream
        .read_exact(&mut header)
        .await
        .context("reading frame header")?;
    let total = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    anyhow::ensure!(total >= 8, "frame header announced {total} bytes");

    let mut payload = vec![0u8; total - 8];
    stream
        .read_exact(&mut payload)
        .await
        .context("reading frame payload")?;
    Ok(payload)
}

/// One request/response exchange over an existing connection.
pub async fn roundtrip(
    stream: &mut TcpStream,
    request: &RequestMessage,
) -> Result<ResponseMessage> {
    write_frame(stream, &request.to_ttlv_bytes()).await?;
    let payload = read_frame(stream).await?;
    Ok(ResponseMessage::from_ttlv_bytes(&payload)?)
}

/// A request with one batch item per operation, IDs `[1]`, `[2]`, ...
pub fn request_for(operations: &[Operation]) -> RequestMessage {
    RequestMessage {
        header: RequestHeader {
            protocol_version: Some(ProtocolVersion::V1_4),
            client_correlation_value: None,
            server_correlation_value: None,
            batch_count: operations.len() as i32,
        },
        batch_items: operations
            .iter()
            .enumerate()
            .map(|(index, op)| RequestBatchItem::new(*op).with_id(vec![index as u8 + 1]))
            .collect(),
    }
}
