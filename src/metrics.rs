// Metrics and observability module
// This file handles collection and reporting of performance metrics,
// statistics, and monitoring data for the execution router.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec,
};

pub static EXECUTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xrouter_executions_total",
        "strategy executions by chain and outcome",
        &["chain", "outcome"]
    )
    .unwrap()
});

pub static EXECUTION_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "xrouter_execution_latency_seconds",
        "end-to-end adapter execution latency",
        &["chain"]
    )
    .unwrap()
});

pub static AUTH_REJECTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xrouter_auth_rejections_total",
        "security layer rejections by check",
        &["check"]
    )
    .unwrap()
});

pub static RETRIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xrouter_retries_total",
        "retry queue activity",
        &["event"]
    )
    .unwrap()
});

pub static BREAKER_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xrouter_breaker_transitions_total",
        "bridge circuit breaker transitions",
        &["bridge", "to_state"]
    )
    .unwrap()
});

pub static HEALTH_PROBES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xrouter_health_probes_total",
        "live adapter health probes by chain",
        &["chain"]
    )
    .unwrap()
});

/// Encode the default prometheus registry to the text exposition format.
pub fn encode_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
