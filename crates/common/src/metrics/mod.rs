//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all attendance metrics
pub const METRICS_PREFIX: &str = "attendance";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Resolver metrics
    describe_counter!(
        format!("{}_check_ins_total", METRICS_PREFIX),
        Unit::Count,
        "Resolved taps by channel and action"
    );

    describe_counter!(
        format!("{}_check_in_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Rejected taps by error code"
    );

    describe_counter!(
        format!("{}_debounced_total", METRICS_PREFIX),
        Unit::Count,
        "Taps answered from the debounce window"
    );

    describe_histogram!(
        format!("{}_resolve_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Time spent resolving one tap"
    );

    // Session metrics
    describe_counter!(
        format!("{}_sessions_expanded_total", METRICS_PREFIX),
        Unit::Count,
        "Session instances materialized from schedules"
    );

    describe_counter!(
        format!("{}_sessions_closed_total", METRICS_PREFIX),
        Unit::Count,
        "Sessions closed, by reason"
    );

    describe_gauge!(
        format!("{}_debounce_entries", METRICS_PREFIX),
        Unit::Count,
        "Entries held by the debounce window"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a successful resolve
pub fn record_check_in(channel: &str, action: &str, duration_secs: f64) {
    counter!(
        format!("{}_check_ins_total", METRICS_PREFIX),
        "channel" => channel.to_string(),
        "action" => action.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_resolve_duration_seconds", METRICS_PREFIX),
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// Record a rejected resolve
pub fn record_check_in_failure(channel: &str, code: &str) {
    counter!(
        format!("{}_check_in_failures_total", METRICS_PREFIX),
        "channel" => channel.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

pub fn record_debounced(channel: &str) {
    counter!(
        format!("{}_debounced_total", METRICS_PREFIX),
        "channel" => channel.to_string()
    )
    .increment(1);
}

pub fn record_session_expanded() {
    counter!(format!("{}_sessions_expanded_total", METRICS_PREFIX)).increment(1);
}

/// `reason` is `manual` or `expired`
pub fn record_session_closed(reason: &str) {
    counter!(
        format!("{}_sessions_closed_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_debounce_entries(entries: usize) {
    gauge!(format!("{}_debounce_entries", METRICS_PREFIX)).set(entries as f64);
}
