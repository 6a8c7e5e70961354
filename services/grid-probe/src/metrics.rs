//! Prometheus metrics exposition
//!
//! Service metrics, alongside the `grid_*` counters the grid records itself:
//!
//! - `probe_results_total` (counter): labels `outcome`, `protocol`
//! - `probe_connect_duration_seconds` (histogram): label `outcome`
//! - `probe_draining` (gauge): 1 while the grid is draining

use conn_pool::Protocol;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const CONNECT_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("probe_connect_duration_seconds".to_string()),
            CONNECT_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `probe_connect_duration_seconds` gets explicit buckets so it renders as a
/// histogram rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a resolved probe. `protocol` is `None` for failures.
pub fn record_probe(outcome: &'static str, protocol: Option<Protocol>, duration_secs: f64) {
    let protocol = protocol.map_or("none", |p| p.label());
    metrics::counter!("probe_results_total", "outcome" => outcome, "protocol" => protocol)
        .increment(1);
    metrics::histogram!("probe_connect_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

pub fn set_draining(draining: bool) {
    metrics::gauge!("probe_draining").set(if draining { 1.0 } else { 0.0 });
}
