//! Metrics collection and exposition.
//!
//! # Metrics
//! - `greenlight_requests_throttled_total` (counter): requests rejected by the limiter
//! - `greenlight_tracked_clients` (gauge): clients held in the throttle registry
//! - `greenlight_tasks_spawned_total` (counter): background tasks submitted
//! - `greenlight_tasks_failed_total` (counter): background tasks that panicked or errored, by reason
//! - `greenlight_tasks_pending` (gauge): background tasks not yet finished

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_throttled() {
    metrics::counter!("greenlight_requests_throttled_total").increment(1);
}

pub fn record_tracked_clients(count: usize) {
    metrics::gauge!("greenlight_tracked_clients").set(count as f64);
}

pub fn record_task_spawned() {
    metrics::counter!("greenlight_tasks_spawned_total").increment(1);
}

pub fn record_task_failed(reason: &'static str) {
    metrics::counter!("greenlight_tasks_failed_total", "reason" => reason).increment(1);
}

pub fn record_tasks_pending(count: usize) {
    metrics::gauge!("greenlight_tasks_pending").set(count as f64);
}
