//! Metrics collection and exposition.
//!
//! # Metrics
//! - `torkeeper_probes_total` (counter): reachability probes by route, outcome
//! - `torkeeper_probe_cache_hits_total` (counter): verdicts served from cache
//! - `torkeeper_connectivity_checks_total` (counter): checker attempts by outcome
//! - `torkeeper_reloads_total` (counter): reload commands issued by the restarter
//! - `torkeeper_restarts_total` (counter): hard restarts issued by the restarter
//! - `torkeeper_process_ready` (gauge): 1=bootstrapped, 0=not ready
//! - `torkeeper_network_changes_total` (counter): coalesced network change signals

use std::net::SocketAddr;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_probe(proxied: bool, reachable: bool) {
    let route = if proxied { "proxied" } else { "direct" };
    let outcome = if reachable { "reachable" } else { "unreachable" };
    metrics::counter!("torkeeper_probes_total", "route" => route, "outcome" => outcome).increment(1);
}

pub fn record_cache_hit() {
    metrics::counter!("torkeeper_probe_cache_hits_total").increment(1);
}

pub fn record_connectivity_check(available: bool) {
    let outcome = if available { "available" } else { "unavailable" };
    metrics::counter!("torkeeper_connectivity_checks_total", "outcome" => outcome).increment(1);
}

pub fn record_reload() {
    metrics::counter!("torkeeper_reloads_total").increment(1);
}

pub fn record_restart() {
    metrics::counter!("torkeeper_restarts_total").increment(1);
}

pub fn record_process_ready(ready: bool) {
    metrics::gauge!("torkeeper_process_ready").set(if ready { 1.0 } else { 0.0 });
}

pub fn record_network_change() {
    metrics::counter!("torkeeper_network_changes_total").increment(1);
}
