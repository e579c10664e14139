/// Metrics and telemetry for Heartline
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Swipe decisions, quota rejections and formed matches
/// - Realtime connections and deliveries
/// - Call state transitions
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Matching Metrics ==========

    /// Recorded swipes by action
    pub static ref SWIPES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "swipes_total",
        "Total number of recorded swipes",
        &["action"]
    )
    .unwrap();

    /// Swipes refused because the daily quota was used up
    pub static ref SWIPE_QUOTA_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        "swipe_quota_rejections_total",
        "Total number of swipes rejected by the daily quota"
    )
    .unwrap();

    /// Matches created or reactivated
    pub static ref MATCHES_FORMED_TOTAL: IntCounter = register_int_counter!(
        "matches_formed_total",
        "Total number of matches formed"
    )
    .unwrap();

    // ========== Realtime Metrics ==========

    /// Open realtime connections
    pub static ref REALTIME_CONNECTIONS: IntGauge = register_int_gauge!(
        "realtime_connections",
        "Number of open realtime connections"
    )
    .unwrap();

    /// Event deliveries by event type and outcome
    pub static ref REALTIME_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "realtime_deliveries_total",
        "Total number of realtime event deliveries",
        &["event_type", "outcome"]
    )
    .unwrap();

    // ========== Call Metrics ==========

    /// Call state transitions by resulting status
    pub static ref CALL_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "call_transitions_total",
        "Total number of call state transitions",
        &["status"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // ========== Error Metrics ==========

    /// Errors by error code
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "errors_total",
        "Total number of errors",
        &["code"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a stored swipe
pub fn record_swipe(action: &str) {
    SWIPES_TOTAL.with_label_values(&[action]).inc();
}

/// Record a swipe refused by the quota
pub fn record_quota_rejection() {
    SWIPE_QUOTA_REJECTIONS_TOTAL.inc();
}

/// Record a newly formed match
pub fn record_match_formed() {
    MATCHES_FORMED_TOTAL.inc();
}

/// Track realtime connection open/close
pub fn record_realtime_connection(opened: bool) {
    if opened {
        REALTIME_CONNECTIONS.inc();
    } else {
        REALTIME_CONNECTIONS.dec();
    }
}

/// Record one event delivery attempt
pub fn record_realtime_delivery(event_type: &str, outcome: &str) {
    REALTIME_DELIVERIES_TOTAL
        .with_label_values(&[event_type, outcome])
        .inc();
}

/// Record a call entering `status`
pub fn record_call_transition(status: &str) {
    CALL_TRANSITIONS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

/// Record an error response
pub fn record_error(code: &str) {
    ERRORS_TOTAL.with_label_values(&[code]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/matches", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_matching_counters() {
        record_swipe("like");
        record_quota_rejection();
        record_match_formed();

        let metrics = render_metrics();
        assert!(metrics.contains("swipes_total"));
        assert!(metrics.contains("swipe_quota_rejections_total"));
        assert!(metrics.contains("matches_formed_total"));
    }

    #[test]
    fn test_record_realtime_and_calls() {
        record_realtime_delivery("typing", "delivered");
        record_call_transition("active");

        let metrics = render_metrics();
        assert!(metrics.contains("realtime_deliveries_total"));
        assert!(metrics.contains("call_transitions_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("typing_sweep", "success", 0.002);
        let metrics = render_metrics();
        assert!(metrics.contains("background_jobs_total"));
        assert!(metrics.contains("background_job_duration_seconds"));
    }
}
