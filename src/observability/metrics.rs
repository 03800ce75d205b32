//! Metrics collection and exposition.
//!
//! # Metrics
//! - `header_sync_passes_total` (counter): sync passes by outcome
//! - `header_sync_pass_duration_seconds` (histogram): pass latency
//! - `header_sync_failures_total` (counter): failed passes by reason
//! - `header_sync_id_collisions_total` (counter): ids refused as in use
//! - `header_sync_installed_headers` (gauge): headers in the installed rule
//! - `header_sync_notifications_total` (counter): status deliveries
//! - `header_sync_store_errors_total` (counter): storage failures by operation
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so tests need no setup
//! - The exporter runs its own HTTP listener

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_sync_pass(outcome: &'static str, started: Instant) {
    counter!("header_sync_passes_total", "outcome" => outcome).increment(1);
    histogram!("header_sync_pass_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_sync_failure(reason: &'static str) {
    counter!("header_sync_failures_total", "reason" => reason).increment(1);
}

pub fn record_id_collision() {
    counter!("header_sync_id_collisions_total").increment(1);
}

pub fn record_installed_headers(count: usize) {
    gauge!("header_sync_installed_headers").set(count as f64);
}

pub fn record_notifications(delivered: usize) {
    counter!("header_sync_notifications_total").increment(delivered as u64);
}

pub fn record_store_error(op: &'static str) {
    counter!("header_sync_store_errors_total", "op" => op).increment(1);
}
