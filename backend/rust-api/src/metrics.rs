use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "route", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "route"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Row store
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_operations_total",
        "Total number of row store operations",
        &["backend", "operation", "table", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "store_operation_duration_seconds",
        "Row store operation duration in seconds",
        &["backend", "operation", "table"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();

    // Session cache
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of session cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_operation_duration_seconds",
        "Session cache operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Business Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "study_sessions_total",
        "Study sessions by lifecycle event",
        &["mode", "event"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "study_sessions_active",
        "Number of study sessions currently in progress"
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    pub static ref FAVORITE_TOGGLES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "favorite_toggles_total",
        "Favorite toggles by resulting state",
        &["result"]
    )
    .unwrap();

    pub static ref PERSISTENCE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "persistence_failures_total",
        "Session progress writes that failed after retries",
        &["operation"]
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a row store operation with metrics
pub async fn track_store_operation<F, T, E>(
    backend: &str,
    operation: &str,
    table: &str,
    future: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation, table, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[backend, operation, table])
        .observe(duration);

    result
}

/// Helper: track a session cache operation with metrics
pub async fn track_cache_operation<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    CACHE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_tracking_counts_errors() {
        let before = STORE_OPERATIONS_TOTAL
            .with_label_values(&["test", "select", "questions", "error"])
            .get();

        let result: Result<(), &str> =
            track_store_operation("test", "select", "questions", async { Err("boom") }).await;

        assert!(result.is_err());
        let after = STORE_OPERATIONS_TOTAL
            .with_label_values(&["test", "select", "questions", "error"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
    }
}
