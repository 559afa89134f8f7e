//! kmipd - KMIP protocol server daemon.
//!
//! Wires configuration, logging and signals around the library: one framed
//! TCP server and one HTTP server (each with its own filtered operation
//! registry), an optional metrics endpoint, and a two-phase shutdown driven
//! by SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kmipd_daemon::config::{listen_addr, Config};
use kmipd_daemon::dispatch::{AuthorizationGate, BatchExecutor, CertificateGate, OperationRegistry, ProxyClient};
use kmipd_daemon::metrics::{serve_metrics, ServerMetrics};
use kmipd_daemon::protocol::{Server, ServerError};
use kmipd_daemon::services::Services;
use kmipd_daemon::{http, tls};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// kmipd - KMIP protocol server
#[derive(Parser, Debug)]
#[command(name = "kmipd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "kmipd.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    // Install the rustls crypto provider before any TLS configuration is
    // built; the builders panic without a process default.
    rustls::crypto::ring::default_provider().install_default().ok();

    let config = if args.config.exists() {
        Config::from_file(&args.config).context("failed to load configuration")?
    } else {
        info!(path = %args.config.display(), "no config file found, using defaults");
        Config::default()
    };
    let config = Arc::new(config);

    let root = CancellationToken::new();

    let metrics = if config.kmip.metrics.enabled {
        Some(ServerMetrics::new().context("failed to initialize metrics registry")?)
    } else {
        None
    };

    let services = Services::new(Arc::clone(&config));
    let authz: Arc<dyn AuthorizationGate> = Arc::new(CertificateGate::new());
    let proxy = config
        .kmip
        .proxy
        .as_ref()
        .map(|p| ProxyClient::new(p.endpoint.as_str()))
        .transpose()
        .context("failed to build proxy client")?;

    if let Some(proxy) = &proxy {
        info!(endpoint = proxy.endpoint(), "edge mode enabled");
    }

    let mut tasks = JoinSet::new();

    if config.kmip.tcp.enabled {
        let cfg = config.kmip.tcp.clone();
        let registry = Arc::new(OperationRegistry::new());
        registry.configure(&cfg.operation);

        let mut executor = BatchExecutor::new(registry, services.clone(), Arc::clone(&authz));
        if let Some(proxy) = proxy.clone() {
            executor = executor.with_proxy(proxy);
        }
        if let Some(metrics) = metrics.clone() {
            executor = executor.with_metrics(metrics);
        }

        let listener = TcpListener::bind(listen_addr(&cfg.address)?)
            .await
            .with_context(|| format!("failed to listen on {}", cfg.address))?;

        let mut builder = Server::builder()
            .with_listener(listener)
            .with_handler(Arc::new(executor));
        if let Some(tls_config) = &cfg.tls {
            builder = builder.with_tls(tls::server_config(tls_config)?);
        }
        if let Some(metrics) = metrics.clone() {
            builder = builder.with_metrics(metrics);
        }

        let server = Arc::new(builder.build(&root)?);
        let shutdown_root = root.clone();
        let serve_server = Arc::clone(&server);
        tasks.spawn(async move {
            let serve = tokio::spawn({
                let server = Arc::clone(&serve_server);
                async move {
                    match server.serve().await {
                        Ok(()) | Err(ServerError::Shutdown) => {}
                        Err(err) => error!(error = %err, "KMIP TCP server failed"),
                    }
                }
            });

            shutdown_root.cancelled().await;
            info!("KMIP TCP server shutdown");
            serve_server.shutdown().await;
            let _ = serve.await;
        });
    }

    if config.kmip.http.enabled {
        let cfg = config.kmip.http.clone();
        let registry = Arc::new(OperationRegistry::new());
        registry.configure(&cfg.operation);

        let mut executor = BatchExecutor::new(registry, services.clone(), Arc::clone(&authz));
        if let Some(proxy) = proxy.clone() {
            executor = executor.with_proxy(proxy);
        }
        if let Some(metrics) = metrics.clone() {
            executor = executor.with_metrics(metrics);
        }

        let http_root = root.clone();
        let http_metrics = metrics.clone();
        tasks.spawn(async move {
            if let Err(err) =
                http::serve(&cfg, Arc::new(executor), http_metrics, http_root).await
            {
                error!(error = %err, "KMIP HTTP server failed");
            }
        });
    }

    if let Some(metrics) = metrics.clone() {
        let addr = listen_addr(&config.kmip.metrics.address)?;
        let metrics_root = root.clone();
        tasks.spawn(async move {
            if let Err(err) = serve_metrics(addr, metrics, metrics_root).await {
                error!(error = %err, "metrics server failed");
            }
        });
    }

    if tasks.is_empty() {
        warn!("no transport enabled; exiting");
        return Ok(());
    }

    // Shutdown on SIGINT/SIGTERM.
    let signal_root = root.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        signal_root.cancel();
    });

    info!(pid = std::process::id(), "kmipd started");

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            error!(error = %err, "service task failed");
        }
    }

    info!("kmipd shutdown complete");
    Ok(())
}
