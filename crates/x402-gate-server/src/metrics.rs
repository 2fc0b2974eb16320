use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use std::sync::LazyLock;

pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_gate_requests_total",
        "Requests to payment-gated endpoints",
        &["endpoint", "status"]
    )
    .expect("metric can be registered")
});

/// `outcome` is `approved` or the rejection reason code.
pub static DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_gate_decisions_total",
        "Payment gate decisions",
        &["outcome"]
    )
    .expect("metric can be registered")
});

pub fn record_request(endpoint: &str, status: u16) {
    REQUESTS
        .with_label_values(&[endpoint, status.to_string().as_str()])
        .inc();
}

pub fn record_decision(outcome: &str) {
    DECISIONS.with_label_values(&[outcome]).inc();
}

pub fn metrics_output() -> String {
    // Touch the counters so they are exported before the first payment.
    LazyLock::force(&REQUESTS);
    LazyLock::force(&DECISIONS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
