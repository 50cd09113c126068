//! Prometheus metrics for the admission gateway
//!
//! This module is only compiled when the `metrics` feature is enabled.
//!
//! - `admission_decisions_total{policy, outcome}` - Counter of admitted/denied requests
//! - `admission_bypassed_total` - Counter of requests that skipped admission
//! - `admission_evictions_total` - Counter of counters removed by the sweeper
//! - `admission_live_counters` - Gauge of counters currently held in memory
//!
//! Labels use the policy prefix, never the caller identity, so cardinality is
//! bounded by the size of the policy table.

use admitgate_gateway_core::{GatewayOutcome, SweepObserver};
use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    /// Admission decisions by matched policy and outcome
    pub static ref ADMISSION_DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "admission_decisions_total",
        "Admission decisions by policy and outcome",
        &["policy", "outcome"]
    )
    .unwrap();

    /// Requests that bypassed admission control
    pub static ref ADMISSION_BYPASSED_TOTAL: Counter = register_counter!(
        "admission_bypassed_total",
        "Requests that bypassed admission control"
    )
    .unwrap();

    /// Counters removed by the eviction sweeper
    pub static ref ADMISSION_EVICTIONS_TOTAL: Counter = register_counter!(
        "admission_evictions_total",
        "Expired window counters removed by the eviction sweeper"
    )
    .unwrap();

    /// Window counters currently in memory
    pub static ref ADMISSION_LIVE_COUNTERS: Gauge = register_gauge!(
        "admission_live_counters",
        "Window counters currently held in memory"
    )
    .unwrap();
}

/// Record the outcome of one request.
pub fn record_outcome(outcome: &GatewayOutcome, live_counters: usize) {
    match outcome {
        GatewayOutcome::Bypass => ADMISSION_BYPASSED_TOTAL.inc(),
        GatewayOutcome::Admit(admission) => {
            let policy = admission.policy.path_prefix.to_string();
            ADMISSION_DECISIONS_TOTAL
                .with_label_values(&[policy.as_str(), "admitted"])
                .inc();
        }
        GatewayOutcome::Deny(admission) => {
            let policy = admission.policy.path_prefix.to_string();
            ADMISSION_DECISIONS_TOTAL
                .with_label_values(&[policy.as_str(), "denied"])
                .inc();
        }
    }
    ADMISSION_LIVE_COUNTERS.set(live_counters as f64);
}

/// Sweep observer that feeds the eviction metrics.
pub fn sweep_observer() -> SweepObserver {
    Arc::new(|evicted, remaining| {
        ADMISSION_EVICTIONS_TOTAL.inc_by(evicted as f64);
        ADMISSION_LIVE_COUNTERS.set(remaining as f64);
    })
}

/// Handler for the `/metrics` endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}
