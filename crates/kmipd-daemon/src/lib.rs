//! kmipd-daemon - KMIP protocol server
//!
//! A network service that accepts KMIP request messages over framed TCP and
//! HTTP, dispatches their batch items through an operation registry, and
//! optionally delegates unsupported operations to an upstream KMIP endpoint
//! (edge mode). The registered key-management operations are stubs; the
//! value is the transport and dispatch engine.
//!
//! # Modules
//!
//! - [`protocol`]: framed TCP transport, stream connection, server
//! - [`http`]: HTTP transport with TTLV/JSON/XML content negotiation
//! - [`dispatch`]: operation registry, authorization, pipeline, proxy
//! - [`operations`]: operation handlers and the default table
//! - [`config`]: TOML configuration surface
//! - [`tls`]: PEM material to rustls server configuration
//! - [`metrics`]: Prometheus counters and the `/metrics` endpoint

pub mod config;
pub mod dispatch;
pub mod http;
pub mod metrics;
pub mod operations;
pub mod protocol;
pub mod services;
pub mod tls;

pub use config::Config;
pub use dispatch::{BatchExecutor, CertificateGate, OperationRegistry, ProxyClient};
pub use protocol::{RequestHandler, Server};
pub use services::Services;
