//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_requests_total` (counter): requests by dispatch state and status
//! - `tunnel_request_duration_seconds` (histogram): latency by dispatch state
//! - `tunnel_handshakes_total` (counter): handshakes by outcome
//! - `tunnel_errors_total` (counter): terminal errors by kind
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(state: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "tunnel_requests_total",
        "state" => state,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("tunnel_request_duration_seconds", "state" => state)
        .record(start.elapsed().as_secs_f64());
}

/// Record a handshake outcome ("success" or "failure").
pub fn record_handshake(outcome: &'static str) {
    metrics::counter!("tunnel_handshakes_total", "outcome" => outcome).increment(1);
}

/// Record a terminal error by kind.
pub fn record_error(kind: &'static str) {
    metrics::counter!("tunnel_errors_total", "kind" => kind).increment(1);
}
