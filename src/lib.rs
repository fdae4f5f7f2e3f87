//! Pong service library: liveness/readiness probes with request
//! instrumentation (correlation IDs, structured logs, Prometheus metrics).

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::ServiceConfig;
pub use error::ServiceError;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, ShutdownListener};
pub use observability::{Metrics, MetricsRegistry};
