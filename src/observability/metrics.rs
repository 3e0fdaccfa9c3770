//! Metrics collection and exposition.
//!
//! # Metrics
//! - `email_gate_decisions_total` (counter): gate decisions by outcome
//! - `email_gate_upstream_errors_total` (counter): failed forwards
//! - `email_gate_upstream_duration_seconds` (histogram): upstream latency by status

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Count one gate decision.
pub fn record_decision(outcome: &'static str) {
    metrics::counter!("email_gate_decisions_total", "outcome" => outcome).increment(1);
}

/// Record a completed upstream exchange.
pub fn record_upstream(status: u16, start: Instant) {
    metrics::histogram!(
        "email_gate_upstream_duration_seconds",
        "status" => status.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error() {
    metrics::counter!("email_gate_upstream_errors_total").increment(1);
}
