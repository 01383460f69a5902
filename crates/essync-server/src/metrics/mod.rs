//! Prometheus metrics for essync
//!
//! The engine records its counters through the `metrics` facade; this
//! module installs the Prometheus recorder behind it and renders the
//! `/metrics` endpoint.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::error::{ServerError, ServerResult};

/// Metric names
pub mod names {
    pub use essync_core::metrics::*;

    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "essync_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "essync_http_request_duration_seconds";

    // System metrics
    pub const UPTIME_SECONDS: &str = "essync_uptime_seconds";
    pub const INFO: &str = "essync_info";
}

fn describe() {
    describe_counter!(names::SYNC_ITERATIONS_TOTAL, "Sync loop iterations started");
    describe_histogram!(names::SYNC_BATCH_SIZE, "Documents fetched per sync batch");
    describe_counter!(names::DOCUMENTS_CREATED_TOTAL, "Documents created on the target");
    describe_counter!(
        names::DOCUMENTS_CONFLICTED_TOTAL,
        "Documents already present on the target"
    );
    describe_counter!(names::DOCUMENTS_FAILED_TOTAL, "Documents that failed to replicate");
    describe_counter!(names::RETENTION_RUNS_TOTAL, "Retention passes issued");
    describe_counter!(names::RETENTION_DELETED_TOTAL, "Documents deleted by retention");
    describe_gauge!(names::UPTIME_SECONDS, "Seconds since the process started");
}

/// Metrics recorder
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder as the process-wide recorder
    pub fn new() -> ServerResult<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ServerError::Metrics(e.to_string()))?;

        describe();
        gauge!(names::INFO, "version" => essync_core::VERSION).set(1.0);

        Ok(Self::with_handle(handle))
    }

    /// Wrap the handle of a recorder installed elsewhere
    pub fn with_handle(handle: PrometheusHandle) -> Self {
        Self {
            handle,
            start_time: Instant::now(),
        }
    }

    /// Get metrics output in Prometheus format
    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());

        self.handle.render()
    }

    /// Record an HTTP request
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        counter!(
            names::HTTP_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            names::HTTP_REQUEST_DURATION_SECONDS,
            "path" => path.to_string()
        )
        .record(duration_secs);
    }
}

/// Axum middleware for recording HTTP metrics
pub async fn metrics_middleware(
    State(metrics): State<Arc<MetricsRecorder>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    metrics.record_http_request(&method, &path, status, duration);

    debug!(
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %(duration * 1000.0),
        "Request completed"
    );

    response
}

/// Handler for /metrics endpoint
pub async fn metrics_handler(State(metrics): State<Arc<MetricsRecorder>>) -> impl IntoResponse {
    let output = metrics.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}
