//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the service instruments (HTTP, background jobs, API calls, files)
//! - Provide typed recording operations on top of counters, gauges, histograms
//! - Render the Prometheus text exposition format for the scrape endpoint
//!
//! # Metrics
//! - `http_requests_total` (counter): requests received
//! - `http_request_duration_seconds` (histogram): latency distribution
//! - `http_request_size_bytes` / `http_response_size_bytes` (histograms)
//! - `http_errors_total` (counter): 5xx responses
//! - `http_requests_active` (gauge): requests in flight
//! - `background_job*`, `api_call*`, `file_process*` families
//!
//! # Design Decisions
//! - Each `Metrics` owns a dedicated Prometheus recorder; nothing is installed
//!   as the process-global recorder, so the instrument set is passed explicitly
//! - Instrument handles are atomics, safe to update from any task
//! - `MetricsRegistry` constructs the set exactly once; reading it before
//!   `init()` is a wiring bug and panics
//! - Histogram samples are buffered by the recorder until folded into their
//!   buckets; `spawn_upkeep` does this on a fixed period so memory stays flat
//!   between scrapes

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::ShutdownListener;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const HTTP_REQUEST_SIZE_BYTES: &str = "http_request_size_bytes";
pub const HTTP_RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";
pub const HTTP_ERRORS_TOTAL: &str = "http_errors_total";
pub const HTTP_REQUESTS_ACTIVE: &str = "http_requests_active";

pub const BACKGROUND_JOBS_TOTAL: &str = "background_jobs_total";
pub const BACKGROUND_JOB_DURATION_SECONDS: &str = "background_job_duration_seconds";
pub const BACKGROUND_JOB_ERRORS_TOTAL: &str = "background_job_errors_total";

pub const API_CALLS_TOTAL: &str = "api_calls_total";
pub const API_CALL_DURATION_SECONDS: &str = "api_call_duration_seconds";
pub const API_CALL_ERRORS_TOTAL: &str = "api_call_errors_total";

pub const FILE_PROCESSES_TOTAL: &str = "file_processes_total";
pub const FILE_PROCESS_DURATION_SECONDS: &str = "file_process_duration_seconds";
pub const FILE_PROCESS_BYTES_TOTAL: &str = "file_process_bytes_total";
pub const FILE_PROCESS_ERRORS_TOTAL: &str = "file_process_errors_total";

/// Latency buckets in seconds, tuned for typical web latencies.
pub const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Payload size buckets in bytes.
pub const SIZE_BUCKETS: &[f64] = &[100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0];

const LATENCY_HISTOGRAMS: [&str; 4] = [
    HTTP_REQUEST_DURATION_SECONDS,
    BACKGROUND_JOB_DURATION_SECONDS,
    API_CALL_DURATION_SECONDS,
    FILE_PROCESS_DURATION_SECONDS,
];

const SIZE_HISTOGRAMS: [&str; 2] = [HTTP_REQUEST_SIZE_BYTES, HTTP_RESPONSE_SIZE_BYTES];

/// Error type for building the instrument set.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid histogram configuration: {0}")]
    Buckets(#[from] BuildError),
}

/// Describes and registers instruments against a single recorder.
struct Registrar<'a> {
    recorder: &'a PrometheusRecorder,
}

impl Registrar<'_> {
    fn metadata() -> Metadata<'static> {
        Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
    }

    fn counter(&self, name: &'static str, help: &'static str) -> Counter {
        self.recorder
            .describe_counter(KeyName::from_const_str(name), None, SharedString::const_str(help));
        self.recorder
            .register_counter(&Key::from_static_name(name), &Self::metadata())
    }

    fn gauge(&self, name: &'static str, help: &'static str) -> Gauge {
        self.recorder
            .describe_gauge(KeyName::from_const_str(name), None, SharedString::const_str(help));
        self.recorder
            .register_gauge(&Key::from_static_name(name), &Self::metadata())
    }

    fn histogram(&self, name: &'static str, help: &'static str) -> Histogram {
        self.recorder
            .describe_histogram(KeyName::from_const_str(name), None, SharedString::const_str(help));
        self.recorder
            .register_histogram(&Key::from_static_name(name), &Self::metadata())
    }
}

/// The service's instrument set.
pub struct Metrics {
    handle: PrometheusHandle,

    // HTTP requests
    request_counter: Counter,
    request_duration: Histogram,
    request_size: Histogram,
    response_size: Histogram,
    http_error_counter: Counter,
    active_requests: Gauge,

    // Background jobs
    background_job_counter: Counter,
    background_job_duration: Histogram,
    background_job_error_counter: Counter,

    // External API calls
    api_call_counter: Counter,
    api_call_duration: Histogram,
    api_call_error_counter: Counter,

    // File processing
    file_process_counter: Counter,
    file_process_duration: Histogram,
    file_process_bytes_counter: Counter,
    file_process_error_counter: Counter,
}

impl Metrics {
    /// Build a fresh instrument set backed by its own Prometheus recorder.
    pub fn new() -> Result<Self, MetricsError> {
        let mut builder = PrometheusBuilder::new();
        for name in LATENCY_HISTOGRAMS {
            builder = builder.set_buckets_for_metric(Matcher::Full(name.to_string()), LATENCY_BUCKETS)?;
        }
        for name in SIZE_HISTOGRAMS {
            builder = builder.set_buckets_for_metric(Matcher::Full(name.to_string()), SIZE_BUCKETS)?;
        }

        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        let r = Registrar { recorder: &recorder };

        Ok(Self {
            handle,

            request_counter: r.counter(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received"),
            request_duration: r.histogram(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds"),
            request_size: r.histogram(HTTP_REQUEST_SIZE_BYTES, "HTTP request size in bytes"),
            response_size: r.histogram(HTTP_RESPONSE_SIZE_BYTES, "HTTP response size in bytes"),
            http_error_counter: r.counter(HTTP_ERRORS_TOTAL, "Total number of HTTP errors (5xx)"),
            active_requests: r.gauge(HTTP_REQUESTS_ACTIVE, "Number of currently active HTTP requests"),

            background_job_counter: r.counter(BACKGROUND_JOBS_TOTAL, "Total number of background jobs executed"),
            background_job_duration: r.histogram(
                BACKGROUND_JOB_DURATION_SECONDS,
                "Background job execution time in seconds",
            ),
            background_job_error_counter: r.counter(
                BACKGROUND_JOB_ERRORS_TOTAL,
                "Total number of background job errors",
            ),

            api_call_counter: r.counter(API_CALLS_TOTAL, "Total number of external API calls made"),
            api_call_duration: r.histogram(API_CALL_DURATION_SECONDS, "External API call latency in seconds"),
            api_call_error_counter: r.counter(API_CALL_ERRORS_TOTAL, "Total number of external API call errors"),

            file_process_counter: r.counter(FILE_PROCESSES_TOTAL, "Total number of file processing operations"),
            file_process_duration: r.histogram(FILE_PROCESS_DURATION_SECONDS, "File processing duration in seconds"),
            file_process_bytes_counter: r.counter(FILE_PROCESS_BYTES_TOTAL, "Total bytes processed"),
            file_process_error_counter: r.counter(FILE_PROCESS_ERRORS_TOTAL, "Total number of file processing errors"),
        })
    }

    /// Count a new request and mark it active.
    ///
    /// The request stays active until the returned guard is dropped.
    pub fn record_request_start(&self) -> ActiveRequestGuard {
        self.request_counter.increment(1);
        self.active_requests.increment(1.0);
        ActiveRequestGuard {
            gauge: self.active_requests.clone(),
        }
    }

    pub fn observe_request_duration(&self, duration: Duration) {
        self.request_duration.record(duration.as_secs_f64());
    }

    pub fn observe_request_size(&self, bytes: u64) {
        self.request_size.record(bytes as f64);
    }

    pub fn observe_response_size(&self, bytes: u64) {
        self.response_size.record(bytes as f64);
    }

    pub fn record_http_error(&self) {
        self.http_error_counter.increment(1);
    }

    /// Record one external API call; the error counter moves only on `Err`.
    pub fn record_api_call<T, E>(&self, duration: Duration, outcome: &Result<T, E>) {
        self.api_call_counter.increment(1);
        self.api_call_duration.record(duration.as_secs_f64());
        if outcome.is_err() {
            self.api_call_error_counter.increment(1);
        }
    }

    /// Record one background job run; the error counter moves only on `Err`.
    pub fn record_background_job<T, E>(&self, duration: Duration, outcome: &Result<T, E>) {
        self.background_job_counter.increment(1);
        self.background_job_duration.record(duration.as_secs_f64());
        if outcome.is_err() {
            self.background_job_error_counter.increment(1);
        }
    }

    /// Record one file processing operation and the bytes it handled.
    pub fn record_file_process<T, E>(&self, duration: Duration, bytes: u64, outcome: &Result<T, E>) {
        self.file_process_counter.increment(1);
        self.file_process_duration.record(duration.as_secs_f64());
        self.file_process_bytes_counter.increment(bytes);
        if outcome.is_err() {
            self.file_process_error_counter.increment(1);
        }
    }

    /// Render all instruments in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Fold buffered histogram samples into their buckets.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }
}

/// Completion token for `Metrics::record_request_start`.
///
/// Decrements `http_requests_active` exactly once, when dropped. Dropping
/// also happens on unwind, so a panicking handler cannot leak an active request.
#[must_use = "dropping the guard immediately marks the request as finished"]
pub struct ActiveRequestGuard {
    gauge: Gauge,
}

impl ActiveRequestGuard {
    /// Mark the request as finished.
    pub fn finish(self) {}
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
    }
}

/// Holder for the single instrument set of a process.
///
/// Created once at startup and shared via `Arc`.
#[derive(Default)]
pub struct MetricsRegistry {
    metrics: OnceLock<Arc<Metrics>>,
    init_lock: Mutex<()>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the instrument set on first call; later and concurrent calls
    /// return the same instance.
    pub fn init(&self) -> Result<Arc<Metrics>, MetricsError> {
        if let Some(metrics) = self.metrics.get() {
            return Ok(metrics.clone());
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(metrics) = self.metrics.get() {
            return Ok(metrics.clone());
        }

        let metrics = Arc::new(Metrics::new()?);
        let _ = self.metrics.set(metrics.clone());
        tracing::debug!("Metrics registry initialized");
        Ok(metrics)
    }

    /// The initialized instrument set.
    ///
    /// # Panics
    /// On every call made before `init()` has completed.
    pub fn get(&self) -> Arc<Metrics> {
        match self.metrics.get() {
            Some(metrics) => metrics.clone(),
            None => panic!("metrics not initialized: call MetricsRegistry::init() first"),
        }
    }

    /// The instrument set if `init()` has completed.
    pub fn try_get(&self) -> Option<Arc<Metrics>> {
        self.metrics.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.metrics.get().is_some()
    }
}

/// Run `Metrics::run_upkeep` every `period` until shutdown.
///
/// Ticks before the registry is initialized are skipped.
pub fn spawn_upkeep(
    registry: Arc<MetricsRegistry>,
    period: Duration,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(metrics) = registry.try_get() {
                        metrics.run_upkeep();
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Metrics upkeep stopped");
                    break;
                }
            }
        }
    })
}

/// Read a single sample value from rendered exposition text.
#[cfg(test)]
pub(crate) fn sample(rendered: &str, series: &str) -> Option<f64> {
    rendered.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(name), Some(value)) if name == series => value.parse().ok(),
            _ => None,
        }
    })
}
