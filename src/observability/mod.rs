//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → correlation.rs (resolve/generate ID, attach to RequestContext)
//!     → metrics.rs (counters, gauges, histograms)
//!     → logging.rs (structured log events carrying the correlation ID)
//!
//! Consumers:
//!     → Log aggregation (stdout, text or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod correlation;
pub mod logging;
pub mod metrics;

pub use correlation::{CorrelationId, RequestContext, X_CORRELATION_ID, X_REQUEST_ID};
pub use metrics::{spawn_upkeep, ActiveRequestGuard, Metrics, MetricsError, MetricsRegistry};
