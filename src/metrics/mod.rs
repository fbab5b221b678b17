use crate::error::{GatewayError, Result};
use crate::rate_limit::AdmissionScope;
use axum::{
    body::Body,
    extract::State,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GatewayError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// A recorder that is not installed globally; renders an empty exposition.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: Arc::new(recorder.handle()),
        }
    }

    fn register_metrics() {
        describe_counter!(
            "gateway_requests_total",
            "Total number of HTTP requests received"
        );
        describe_histogram!(
            "gateway_request_duration_seconds",
            "HTTP request latencies in seconds"
        );
        describe_counter!(
            "gateway_requests_errors_total",
            "Total number of HTTP requests that resulted in errors"
        );

        describe_counter!(
            "gateway_admission_total",
            "Admission decisions by scope and outcome"
        );

        describe_counter!(
            "gateway_cache_lookups_total",
            "Cache lookups by result (hit, miss, error)"
        );
        describe_counter!(
            "gateway_cache_store_failures_total",
            "Cache writes and invalidations that failed"
        );

        describe_counter!(
            "gateway_store_operations_total",
            "Resource store calls by operation and outcome"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let mut response = Response::new(Body::from(service.render()));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

/// Record a request metric; `route` is the matched route template
pub fn record_request(method: &str, route: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];

    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(duration);

    if status >= 400 {
        counter!("gateway_requests_errors_total", &labels).increment(1);
    }
}

/// Record an admission outcome: allowed, denied, fail_open or unavailable
pub fn record_admission(scope: AdmissionScope, outcome: &'static str) {
    counter!(
        "gateway_admission_total",
        "scope" => scope.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a cache lookup: hit, miss or error
pub fn record_cache_lookup(result: &'static str) {
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

/// Record a failed cache write or invalidation
pub fn record_cache_store_failure(operation: &'static str) {
    counter!("gateway_cache_store_failures_total", "operation" => operation).increment(1);
}

/// Record a resource store call
pub fn record_store_operation(operation: &'static str, outcome: &'static str) {
    counter!(
        "gateway_store_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
    method: String,
    route: String,
}

impl Timer {
    pub fn new(method: String, route: String) -> Self {
        Self {
            start: Instant::now(),
            method,
            route,
        }
    }

    /// Record the elapsed time with the given status code
    pub fn record(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request(&self.method, &self.route, status, duration);
    }

    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
