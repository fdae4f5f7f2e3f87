//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (instrumentation, request timeout)
//! - Bind server to listener with peer address info
//! - Graceful shutdown with a drain deadline
//! - Periodic metrics upkeep for the lifetime of the server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServiceConfig;
use crate::http::handlers;
use crate::http::middleware::instrument_request;
use crate::lifecycle::ShutdownListener;
use crate::observability::{spawn_upkeep, MetricsRegistry};

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MetricsRegistry>,
}

/// HTTP server for the service.
pub struct HttpServer {
    router: Router,
    registry: Arc<MetricsRegistry>,
    config: ServiceConfig,
}

impl HttpServer {
    /// Create a new HTTP server.
    ///
    /// The registry must be initialized before the first request arrives.
    pub fn new(config: ServiceConfig, registry: Arc<MetricsRegistry>) -> Self {
        let state = AppState {
            registry: registry.clone(),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            registry,
            config,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Instrumentation is outermost so timeouts are observed as well.
    #[allow(deprecated)]
    fn build_router(config: &ServiceConfig, state: AppState) -> Router {
        Router::new()
            .route("/", get(handlers::pong))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .route("/ping", get(handlers::ping))
            .fallback(handlers::pong)
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(state.clone(), instrument_request))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
            .with_state(state)
    }

    /// The fully layered router, e.g. for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests
    /// for at most `timeouts.shutdown_secs`.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownListener,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let upkeep = spawn_upkeep(
            self.registry.clone(),
            Duration::from_secs(self.config.observability.metrics_upkeep_secs),
            shutdown.clone(),
        );

        let drain_timeout = Duration::from_secs(self.config.timeouts.shutdown_secs);
        let (draining_tx, draining_rx) = oneshot::channel::<()>();

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
                let _ = draining_tx.send(());
            })
            .into_future();
        tokio::pin!(serve);

        let result = tokio::select! {
            result = &mut serve => result,
            Ok(()) = draining_rx => {
                match tokio::time::timeout(drain_timeout, &mut serve).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            timeout_secs = drain_timeout.as_secs(),
                            "Drain deadline exceeded, abandoning in-flight requests"
                        );
                        Ok(())
                    }
                }
            }
        };

        // serve can also end on an accept error, without shutdown firing.
        upkeep.abort();

        result?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn server() -> HttpServer {
        let registry = Arc::new(MetricsRegistry::new());
        registry.init().unwrap();
        HttpServer::new(ServiceConfig::default(), registry)
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_pong() {
        let (status, content_type, body) = get(server().router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "text/plain");
        assert_eq!(body, "pong\n");
    }

    #[tokio::test]
    async fn test_unknown_path_falls_back_to_pong() {
        let (status, _, body) = get(server().router(), "/anything/else").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "pong\n");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, content_type, body) = get(server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "application/json");
        assert!(body.contains(r#"{"status":"healthy"}"#));

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "healthy");
    }

    #[tokio::test]
    async fn test_metrics() {
        let server = server();
        get(server.router(), "/").await;

        let (status, content_type, body) = get(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, handlers::PROMETHEUS_CONTENT_TYPE);
        assert!(body.contains("# HELP http_requests_total"));
        assert!(body.contains("# TYPE http_request_duration_seconds histogram"));
    }

    #[tokio::test]
    async fn test_ping_echoes_correlation_id() {
        let response = server()
            .router()
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header("X-Request-ID", "test-ping-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-correlation-id"], "test-ping-id");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"pong (id=test-ping-id)\n");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = registry.init().unwrap();
        let mut config = ServiceConfig::default();
        config.observability.metrics_upkeep_secs = 1;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = crate::lifecycle::Shutdown::new();
        let handle = tokio::spawn(HttpServer::new(config, registry).run(listener, shutdown.subscribe()));

        metrics.observe_request_duration(Duration::from_millis(3));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("server should stop after shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(
            crate::observability::metrics::sample(&metrics.render(), "http_request_duration_seconds_count"),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_ping_generates_id() {
        let (status, _, body) = get(server().router(), "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("pong (id="));
        assert!(body.len() > "pong (id=)\n".len());
    }
}
