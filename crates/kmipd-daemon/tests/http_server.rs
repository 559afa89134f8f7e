//! End-to-end tests for the HTTP transport.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use common::request_for;
use kmipd_core::error::ResultReason;
use kmipd_core::{Operation, ResponseMessage, ResultStatus};
use kmipd_daemon::config::{Config, HttpConfig};
use kmipd_daemon::dispatch::{BatchExecutor, CertificateGate, OperationRegistry};
use kmipd_daemon::http;
use kmipd_daemon::services::Services;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start_http_server() -> Result<(SocketAddr, CancellationToken)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let executor = BatchExecutor::new(
        Arc::new(OperationRegistry::new()),
        Services::new(Arc::new(Config::default())),
        Arc::new(CertificateGate::new()),
    );

    let root = CancellationToken::new();
    let config = HttpConfig {
        enabled: true,
        ..HttpConfig::default()
    };
    let serve_root = root.clone();
    tokio::spawn(async move {
        let _ = http::serve_on(listener, &config, Arc::new(executor), None, serve_root).await;
    });

    Ok((addr, root))
}

fn endpoint(addr: SocketAddr) -> String {
    format!("http://{addr}/kmip")
}

#[tokio::test]
async fn json_request_gets_a_json_response() -> Result<()> {
    let (addr, _root) = start_http_server().await?;

    let body = request_for(&[Operation::CREATE]).to_json_bytes();
    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("Content-Type").unwrap(),
        "application/json"
    );
    assert_eq!(response.headers().get("Accept").unwrap(), "application/json");

    let message = ResponseMessage::from_json_bytes(&response.bytes().await?)?;
    assert_eq!(message.batch_items.len(), 1);
    assert_eq!(message.batch_items[0].result_status, ResultStatus::Success);
    Ok(())
}

#[tokio::test]
async fn ttlv_and_xml_encodings_are_negotiated() -> Result<()> {
    let (addr, _root) = start_http_server().await?;
    let client = reqwest::Client::new();

    let ttlv = client
        .post(endpoint(addr))
        .header("Content-Type", "application/octet-stream")
        .body(request_for(&[Operation::CREATE]).to_ttlv_bytes())
        .send()
        .await?;
    assert_eq!(ttlv.status(), 200);
    let message = ResponseMessage::from_ttlv_bytes(&ttlv.bytes().await?)?;
    assert_eq!(message.batch_items[0].result_status, ResultStatus::Success);

    let xml = client
        .post(endpoint(addr))
        .header("Content-Type", "text/xml")
        .body(request_for(&[Operation::DISCOVER_VERSIONS]).to_xml_bytes())
        .send()
        .await?;
    assert_eq!(xml.status(), 200);
    assert_eq!(xml.headers().get("Content-Type").unwrap(), "text/xml");
    let message = ResponseMessage::from_xml_bytes(&xml.bytes().await?)?;
    assert_eq!(message.batch_items[0].result_status, ResultStatus::Success);
    Ok(())
}

#[tokio::test]
async fn missing_content_length_is_411() -> Result<()> {
    let (addr, _root) = start_http_server().await?;

    // An empty body carries Content-Length: 0, which is as missing.
    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .header("Content-Type", "application/json")
        .send()
        .await?;
    assert_eq!(response.status(), 411);
    assert!(response.bytes().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn non_post_methods_are_405() -> Result<()> {
    let (addr, _root) = start_http_server().await?;
    let response = reqwest::Client::new().get(endpoint(addr)).send().await?;
    assert_eq!(response.status(), 405);
    Ok(())
}

#[tokio::test]
async fn unsupported_content_type_is_415() -> Result<()> {
    let (addr, _root) = start_http_server().await?;
    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .header("Content-Type", "text/plain")
        .body("hello")
        .send()
        .await?;
    assert_eq!(response.status(), 415);
    Ok(())
}

#[tokio::test]
async fn oversize_content_length_is_400() -> Result<()> {
    let (addr, _root) = start_http_server().await?;
    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .header("Content-Type", "application/octet-stream")
        .header("Content-Length", (2 * 1024 * 1024).to_string())
        .body(vec![0u8; 2 * 1024 * 1024])
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn undecodable_body_still_answers_200_with_kmip_error() -> Result<()> {
    let (addr, _root) = start_http_server().await?;
    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .header("Content-Type", "application/json")
        .body("{\"not\": \"kmip\"}")
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let message = ResponseMessage::from_json_bytes(&response.bytes().await?)?;
    assert_eq!(message.batch_items.len(), 1);
    assert_eq!(
        message.batch_items[0].result_status,
        ResultStatus::OperationFailed
    );
    assert_eq!(
        message.batch_items[0].result_reason,
        Some(ResultReason::InvalidMessage)
    );
    Ok(())
}

#[tokio::test]
async fn unknown_path_is_404() -> Result<()> {
    let (addr, _root) = start_http_server().await?;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/other"))
        .header("Content-Type", "application/json")
        .body("{}")
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    Ok(())
}
