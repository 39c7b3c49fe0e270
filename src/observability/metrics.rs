//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by kind (plain, upgrade) and status
//! - `proxy_upstream_errors_total` (counter): plain-path forwarding failures
//! - `proxy_ws_dial_failures_total` (counter): backend WebSocket dials that failed
//! - `proxy_ws_sessions_active` (gauge): open relay sessions
//! - `proxy_ws_frames_total` (counter): relayed frames by direction and type
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(kind: &'static str, status: u16) {
    ::metrics::counter!("proxy_requests_total", "kind" => kind, "status" => status.to_string())
        .increment(1);
}

pub fn record_upstream_error() {
    ::metrics::counter!("proxy_upstream_errors_total").increment(1);
}

pub fn record_dial_failure() {
    ::metrics::counter!("proxy_ws_dial_failures_total").increment(1);
}

pub fn record_frame(direction: &'static str, payload_type: &'static str) {
    ::metrics::counter!(
        "proxy_ws_frames_total",
        "direction" => direction,
        "type" => payload_type
    )
    .increment(1);
}

pub fn ws_session_opened() {
    ::metrics::gauge!("proxy_ws_sessions_active").increment(1.0);
}

pub fn ws_session_closed() {
    ::metrics::gauge!("proxy_ws_sessions_active").decrement(1.0);
}
