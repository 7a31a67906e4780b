use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all LifeHub metrics
const PREFIX: &str = "lifehub";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request latency in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method", "endpoint"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Background job metrics
    pub static ref JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Total number of finished job executions"),
        &["job", "status"]
    ).expect("Failed to create job_executions_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Job execution duration in seconds, retries included"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0]),
        &["job"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOB_QUEUE_REJECTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_queue_rejections_total"), "Submissions rejected by the worker pool"),
        &["reason"]
    ).expect("Failed to create job_queue_rejections_total metric");

    pub static ref JOB_QUEUE_DEPTH: IntGauge = IntGauge::new(
        format!("{PREFIX}_job_queue_depth"),
        "Jobs waiting in the worker pool queue"
    ).expect("Failed to create job_queue_depth metric");

    // WebSocket metrics
    pub static ref WS_CONNECTIONS: Gauge = Gauge::new(
        format!("{PREFIX}_ws_connections"),
        "Number of connected WebSocket clients"
    ).expect("Failed to create ws_connections metric");

    pub static ref WS_DROPPED_MESSAGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ws_dropped_messages_total"), "Realtime messages dropped instead of delivered"),
        &["reason"]
    ).expect("Failed to create ws_dropped_messages_total metric");
}

/// Initialize all metrics and register them with the registry
pub fn init_metrics() {
    // Ignore errors if already registered (tests call this repeatedly)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_QUEUE_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(WS_CONNECTIONS.clone()));
    let _ = REGISTRY.register(Box::new(WS_DROPPED_MESSAGES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapse a request path into a low-cardinality endpoint label.
///
/// Job names are kept since they come from a fixed registry; anything else
/// past the known prefixes is folded away.
pub fn categorize_endpoint(path: &str) -> &'static str {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["health"] => "/health",
        ["v1", "ws"] => "/v1/ws",
        ["v1", "jobs"] => "/v1/jobs",
        ["v1", "jobs", "metrics"] => "/v1/jobs/metrics",
        ["v1", "jobs", _] => "/v1/jobs/{name}",
        ["v1", "jobs", _, "history"] => "/v1/jobs/{name}/history",
        ["v1", "jobs", _, "trigger"] => "/v1/jobs/{name}/trigger",
        _ => "other",
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

pub fn record_job_execution(job: &str, status: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL.with_label_values(&[job, status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn record_queue_rejection(reason: &str) {
    JOB_QUEUE_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn job_enqueued() {
    JOB_QUEUE_DEPTH.inc();
}

pub fn job_dequeued() {
    JOB_QUEUE_DEPTH.dec();
}

pub fn reset_queue_depth() {
    JOB_QUEUE_DEPTH.set(0);
}

pub fn set_ws_connections(count: usize) {
    WS_CONNECTIONS.set(count as f64);
}

/// `reason` is `broadcast_full` (hub channel) or `client_full` (one client's queue).
pub fn record_dropped_message(reason: &str) {
    WS_DROPPED_MESSAGES_TOTAL.with_label_values(&[reason]).inc();
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
