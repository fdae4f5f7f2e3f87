//! Top-level error type for service startup.

use crate::config::ConfigError;
use crate::observability::logging::LoggingError;
use crate::observability::MetricsError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
