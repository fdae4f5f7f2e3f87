//! Correlation ID generation and propagation.
//!
//! # Responsibilities
//! - Generate unique correlation IDs (UUID v4)
//! - Resolve the inbound ID from `X-Request-ID` / `X-Correlation-ID`
//! - Carry the ID through a typed, per-request context
//!
//! # Design Decisions
//! - Context is immutable: attaching an ID yields a new value
//! - Stored in request extensions, read back through an extractor
//! - An attached empty ID reads back as empty, it is only regenerated
//!   by `get_or_create_correlation_id`

use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap, HeaderName};
use uuid::Uuid;

/// Primary inbound header carrying a caller-supplied ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Secondary inbound header, also set on every response.
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Opaque identifier tying together all log lines of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Per-request context value.
///
/// Inserted into the request extensions by the instrumentation middleware and
/// available to handlers as an extractor.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    correlation_id: Option<CorrelationId>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this context carrying `id`.
    pub fn with_correlation_id(&self, id: impl Into<CorrelationId>) -> Self {
        Self {
            correlation_id: Some(id.into()),
        }
    }

    /// The attached ID, or `""` when none was attached.
    pub fn correlation_id(&self) -> &str {
        self.correlation_id
            .as_ref()
            .map(CorrelationId::as_str)
            .unwrap_or_default()
    }

    /// The attached ID when non-empty, otherwise a freshly generated one.
    ///
    /// Does not store the generated ID.
    pub fn get_or_create_correlation_id(&self) -> CorrelationId {
        match &self.correlation_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => CorrelationId::generate(),
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Resolve the caller-supplied ID: `X-Request-ID` first, then `X-Correlation-ID`.
///
/// Empty and non-UTF-8 values count as absent.
pub fn correlation_id_from_headers(headers: &HeaderMap) -> Option<CorrelationId> {
    [X_REQUEST_ID, X_CORRELATION_ID].iter().find_map(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(CorrelationId::from)
    })
}
