//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingress_controller_syncs_total` (counter): reconciliation ticks by outcome
//! - `ingress_controller_sync_duration_seconds` (histogram)
//! - `ingress_controller_reloads_total` (counter): full reloads by outcome
//! - `ingress_controller_dynamic_updates_total` (counter): backend pushes by outcome
//! - `ingress_controller_admission_batches_total` (counter)
//! - `ingress_controller_admission_batch_size` (histogram)
//! - `ingress_controller_admission_requests_total` (counter): verdicts by outcome
//! - `ingress_controller_passthrough_connections_total` (counter): by outcome
//! - `ingress_controller_ssl_expire_time_seconds` (gauge): per host
//! - `ingress_controller_backend_endpoints` (gauge): per backend

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter installed");
    Ok(())
}

pub fn record_sync(outcome: &'static str, duration: Duration) {
    metrics::counter!("ingress_controller_syncs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("ingress_controller_sync_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_reload(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("ingress_controller_reloads_total", "outcome" => outcome).increment(1);
}

pub fn record_dynamic_update(outcome: &'static str) {
    metrics::counter!("ingress_controller_dynamic_updates_total", "outcome" => outcome).increment(1);
}

pub fn record_admission_batch(size: usize, duration: Duration) {
    metrics::counter!("ingress_controller_admission_batches_total").increment(1);
    metrics::histogram!("ingress_controller_admission_batch_size").record(size as f64);
    metrics::histogram!("ingress_controller_admission_batch_duration_seconds")
        .record(duration.as_secs_f64());
}

pub fn record_admission_verdict(outcome: &'static str) {
    metrics::counter!("ingress_controller_admission_requests_total", "outcome" => outcome)
        .increment(1);
}

pub fn record_passthrough_connection(outcome: &'static str) {
    metrics::counter!("ingress_controller_passthrough_connections_total", "outcome" => outcome)
        .increment(1);
}

pub fn set_ssl_expiry(host: &str, not_after: i64) {
    metrics::gauge!("ingress_controller_ssl_expire_time_seconds", "host" => host.to_string())
        .set(not_after as f64);
}

pub fn set_backend_endpoints(backend: &str, count: usize) {
    metrics::gauge!("ingress_controller_backend_endpoints", "backend" => backend.to_string())
        .set(count as f64);
}

/// Zero the series of a host that no longer exists.
pub fn remove_host(host: &str) {
    set_ssl_expiry(host, 0);
}

/// Zero the series of a backend that no longer exists.
pub fn remove_backend(backend: &str) {
    set_backend_endpoints(backend, 0);
}

pub fn set_certificate_in_use(secret: &str, in_use: bool) {
    metrics::gauge!("ingress_controller_ssl_certificate_in_use", "secret" => secret.to_string())
        .set(if in_use { 1.0 } else { 0.0 });
}
