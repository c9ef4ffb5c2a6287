//! Prometheus metrics
//!
//! Exposes operational metrics for monitoring and alerting:
//! - Request rates and latencies
//! - Assignment and conversion outcomes
//! - Analysis latency
//! - Store operations and tests by status
//!
//! NOTE: test, session and organization ids never appear in labels; they are
//! unbounded and would blow up Prometheus cardinality.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};

use crate::experiments::TestStatus;

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Request Metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "growth_ab_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "endpoint", "status"]
    ).unwrap();

    /// Total HTTP requests
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("growth_ab_http_requests_total", "Total HTTP requests"),
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Experiment Metrics
    // ============================================================================

    /// Variant assignments by outcome
    pub static ref ASSIGNMENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("growth_ab_assignments_total", "Total variant assignment requests"),
        &["outcome"]  // outcome: "new", "existing", "not_running", "error"
    ).unwrap();

    /// Conversions by outcome
    pub static ref CONVERSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("growth_ab_conversions_total", "Total conversion recording requests"),
        &["outcome"]  // outcome: "recorded", "repeat", "unknown_session", "error"
    ).unwrap();

    /// Results aggregation duration
    pub static ref ANALYSIS_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "growth_ab_analysis_duration_seconds",
            "Results aggregation duration"
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0])
    ).unwrap();

    /// Tests by status (refreshed when /metrics is scraped)
    pub static ref TESTS_BY_STATUS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("growth_ab_tests", "Number of tests by status"),
        &["status"]
    ).unwrap();

    // ============================================================================
    // Storage Metrics
    // ============================================================================

    /// Store operations
    pub static ref STORE_OPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("growth_ab_store_ops_total", "Total experiment store operations"),
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Total errors by code
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("growth_ab_errors_total", "Total API errors by code"),
        &["code"]
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(ASSIGNMENTS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(CONVERSIONS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(ANALYSIS_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(TESTS_BY_STATUS.clone()))?;

    METRICS_REGISTRY.register(Box::new(STORE_OPS_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn record_assignment(outcome: &str) {
    ASSIGNMENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_conversion(outcome: &str) {
    CONVERSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_store_op(operation: &str) {
    STORE_OPS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_error(code: &str) {
    ERRORS_TOTAL.with_label_values(&[code]).inc();
}

/// Overwrite the tests-by-status gauge
pub fn set_tests_by_status(counts: &[(TestStatus, u64)]) {
    for (status, count) in counts {
        TESTS_BY_STATUS
            .with_label_values(&[status.as_str()])
            .set(i64::try_from(*count).unwrap_or(i64::MAX));
    }
}

/// Times an operation into a histogram (RAII)
/// Usage: let _timer = Timer::new(ANALYSIS_DURATION.clone());
pub struct Timer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Timer {
    /// Create timer that records duration to histogram on drop
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
