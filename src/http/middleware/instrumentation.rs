//! Request instrumentation middleware.
//!
//! Wraps every request with correlation ID resolution, request/response
//! logging and metrics recording.
//!
//! # Data Flow
//! ```text
//! Request
//!     → resolve correlation ID (X-Request-ID > X-Correlation-ID > generated)
//!     → attach RequestContext to extensions
//!     → record start (counter + active gauge), request size, start log
//!     → inner handler (inside a `request` span)
//!     → set X-Correlation-ID on the response
//!     → ObservedBody counts bytes as the body streams out
//!     → on end of body: duration, response size, end log, 5xx counter
//! ```

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body::{Frame, SizeHint};
use tracing::Instrument;

use crate::http::server::AppState;
use crate::observability::correlation::correlation_id_from_headers;
use crate::observability::{ActiveRequestGuard, CorrelationId, Metrics, RequestContext, X_CORRELATION_ID};

/// Middleware function for request instrumentation.
pub async fn instrument_request(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let correlation_id =
        correlation_id_from_headers(request.headers()).unwrap_or_else(CorrelationId::generate);
    request
        .extensions_mut()
        .insert(RequestContext::new().with_correlation_id(correlation_id.clone()));

    let metrics = state.registry.get();
    let started = Instant::now();
    let active = metrics.record_request_start();

    // Unknown-length (chunked) requests are not observed.
    if let Some(size) = request_size(&request).filter(|size| *size > 0) {
        metrics.observe_request_size(size);
    }

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    tracing::info!(
        method = %method,
        path = %path,
        remote_addr = %remote_addr,
        user_agent = %user_agent,
        correlation_id = %correlation_id,
        "Request started"
    );

    let span = tracing::info_span!("request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    match HeaderValue::from_str(correlation_id.as_str()) {
        Ok(value) => {
            response.headers_mut().insert(X_CORRELATION_ID, value);
        }
        Err(_) => {
            tracing::warn!(correlation_id = %correlation_id, "Correlation ID is not a valid header value");
        }
    }

    let observation = RequestObservation {
        metrics,
        started,
        method,
        path,
        status: response.status(),
        correlation_id,
        _active: active,
    };

    response.map(|body| Body::new(ObservedBody::new(body, observation)))
}

/// Declared request payload size, if known.
fn request_size(request: &Request) -> Option<u64> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| request.body().size_hint().exact())
}

/// Everything needed to close out one request once its body is done.
struct RequestObservation {
    metrics: Arc<Metrics>,
    started: Instant,
    method: Method,
    path: String,
    status: StatusCode,
    correlation_id: CorrelationId,
    _active: ActiveRequestGuard,
}

impl RequestObservation {
    fn finish(self, written: u64) {
        let duration = self.started.elapsed();
        self.metrics.observe_request_duration(duration);
        self.metrics.observe_response_size(written);

        if self.status.as_u16() >= 500 {
            self.metrics.record_http_error();
            tracing::warn!(
                method = %self.method,
                path = %self.path,
                status = self.status.as_u16(),
                duration_secs = duration.as_secs_f64(),
                response_size = written,
                correlation_id = %self.correlation_id,
                "Request completed"
            );
        } else {
            tracing::info!(
                method = %self.method,
                path = %self.path,
                status = self.status.as_u16(),
                duration_secs = duration.as_secs_f64(),
                response_size = written,
                correlation_id = %self.correlation_id,
                "Request completed"
            );
        }
    }
}

/// Response body that forwards every frame untouched while counting data bytes.
///
/// The observation is finished exactly once: at end of stream, or when the
/// body is dropped early (client gone, stream error).
struct ObservedBody {
    inner: Body,
    written: u64,
    observation: Option<RequestObservation>,
}

impl ObservedBody {
    fn new(inner: Body, observation: RequestObservation) -> Self {
        Self {
            inner,
            written: 0,
            observation: Some(observation),
        }
    }

    fn finish(&mut self) {
        if let Some(observation) = self.observation.take() {
            observation.finish(self.written);
        }
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.written += data.len() as u64;
                }
            }
            Poll::Ready(None) => this.finish(),
            _ => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        self.finish();
    }
}
