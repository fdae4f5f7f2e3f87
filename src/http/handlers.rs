//! Probe and scrape endpoints.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::http::server::AppState;
use crate::observability::RequestContext;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// Liveness probe: `pong`.
pub async fn pong(ctx: RequestContext) -> impl IntoResponse {
    tracing::debug!(correlation_id = %ctx.correlation_id(), "Processing pong request");
    ([(header::CONTENT_TYPE, "text/plain")], "pong\n")
}

/// Readiness probe for load balancers.
pub async fn health(ctx: RequestContext) -> Json<HealthStatus> {
    tracing::debug!(correlation_id = %ctx.correlation_id(), "Processing health check request");
    Json(HealthStatus { status: "healthy" })
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<AppState>, ctx: RequestContext) -> impl IntoResponse {
    tracing::debug!(correlation_id = %ctx.correlation_id(), "Processing metrics request");
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.registry.get().render(),
    )
}

/// Ping that echoes the request's correlation ID.
pub async fn ping(ctx: RequestContext) -> impl IntoResponse {
    tracing::debug!(correlation_id = %ctx.correlation_id(), "Processing ping request");
    (
        [(header::CONTENT_TYPE, "text/plain")],
        format!("pong (id={})\n", ctx.correlation_id()),
    )
}
