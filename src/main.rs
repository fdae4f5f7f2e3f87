//! Pong service.
//!
//! ```text
//!     Client Request
//!     ──────────────▶ instrumentation ──▶ timeout ──▶ handler (/, /health, /metrics, /ping)
//!                     │  correlation ID                  │
//!                     │  counters/gauges/histograms      │
//!     ◀────────────── │  start/end log lines ◀───────────┘
//!     X-Correlation-ID
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use pong_service::config::{apply_env_overrides, load_config, validate_config, ConfigError};
use pong_service::lifecycle::shutdown_signal;
use pong_service::observability::logging::init_logging;
use pong_service::observability::{X_CORRELATION_ID, X_REQUEST_ID};
use pong_service::{HttpServer, MetricsRegistry, ServiceConfig, ServiceError, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "pong-service", version, about = "Liveness/readiness service with request instrumentation")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file and PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pong-service starting");
    tracing::info!(
        bind_address = %config.listener.bind_address(),
        request_timeout_secs = config.timeouts.request_secs,
        shutdown_timeout_secs = config.timeouts.shutdown_secs,
        metrics_upkeep_secs = config.observability.metrics_upkeep_secs,
        "Configuration loaded"
    );

    let registry = Arc::new(MetricsRegistry::new());
    registry.init()?;
    tracing::info!("Metrics initialized");

    let listener = TcpListener::bind(config.listener.bind_address()).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        metrics = %format!("http://{}/metrics", local_addr),
        correlation_headers = %format!("{}, {}", X_REQUEST_ID, X_CORRELATION_ID),
        "Listening for connections"
    );

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    let server = HttpServer::new(config, registry);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
