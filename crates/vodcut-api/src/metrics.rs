//! Prometheus metrics.
//!
//! The recorder is process-global; pipeline metrics recorded elsewhere in
//! the process are rendered by the same handle.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder and return its render handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "vodcut_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vodcut_http_request_duration_seconds";
    pub const WEBHOOK_EVENTS_TOTAL: &str = "vodcut_webhook_events_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a webhook event by outcome (`accepted`, `ignored`, `dropped`).
pub fn record_webhook_event(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::WEBHOOK_EVENTS_TOTAL, &labels).increment(1);
}

/// Metrics middleware for HTTP requests.
/// Requests that match no route share the `unmatched` path label.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let path = if status == 404 { "unmatched".to_string() } else { path };
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}
