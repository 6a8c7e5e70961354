//! Probe streams issued through the connectivity grid
//!
//! Each probe asks the grid for a stream and records which protocol (if any)
//! the grid settled on. Probes are never sent any request data; a ready
//! stream is released as soon as it is reported.

use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use conn_grid::ConnectivityGrid;
use conn_pool::{
    ConnectionPool, HostHandle, PoolCallbacks, PoolFailureReason, Protocol, RequestEncoder,
    ResponseDecoder, StreamInfo,
};
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::metrics;
use crate::service::ServiceMetrics;

/// Receives the grid's verdict for one probe.
struct ProbeCallbacks {
    request_id: String,
    started: Instant,
    metrics: ServiceMetrics,
}

impl PoolCallbacks for ProbeCallbacks {
    fn on_pool_failure(
        self: Box<Self>,
        reason: PoolFailureReason,
        transport_failure_reason: &str,
        host: HostHandle,
    ) {
        let elapsed = self.started.elapsed();
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.metrics.probes_failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_probe("failure", None, elapsed.as_secs_f64());
        warn!(
            request_id = %self.request_id,
            upstream = %host,
            reason = reason.label(),
            transport_failure_reason,
            elapsed_ms = elapsed.as_millis() as u64,
            "probe failed on every tier"
        );
    }

    fn on_pool_ready(
        self: Box<Self>,
        encoder: Box<dyn RequestEncoder>,
        host: HostHandle,
        info: &StreamInfo,
        protocol: Option<Protocol>,
    ) {
        let elapsed = self.started.elapsed();
        let protocol = protocol.unwrap_or_else(|| encoder.protocol());
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.metrics.probes_ready.fetch_add(1, Ordering::Relaxed);
        metrics::record_probe("ready", Some(protocol), elapsed.as_secs_f64());
        info!(
            request_id = %self.request_id,
            upstream = %host,
            protocol = protocol.label(),
            stream_id = encoder.stream_id(),
            connection_id = info.connection_id,
            connect_ms = info.connect_duration.as_millis() as u64,
            "probe stream ready"
        );
    }
}

/// Probes never receive response data.
struct DiscardDecoder;

impl ResponseDecoder for DiscardDecoder {
    fn decode_headers(&self, status: u16, _end_stream: bool) {
        debug!(status, "unexpected probe response headers");
    }

    fn decode_data(&self, data: &[u8], _end_stream: bool) {
        debug!(bytes = data.len(), "unexpected probe response data");
    }
}

/// Issue one probe through `grid`.
pub fn issue(grid: &ConnectivityGrid, metrics: &ServiceMetrics) {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    metrics.probes_issued.fetch_add(1, Ordering::Relaxed);
    metrics.in_flight.fetch_add(1, Ordering::Relaxed);
    debug!(request_id = %request_id, "issuing probe");

    let callbacks = Box::new(ProbeCallbacks {
        request_id,
        started: Instant::now(),
        metrics: metrics.clone(),
    });
    // Probes run to completion; the cancel handle is not needed.
    let _ = grid.new_stream(Rc::new(DiscardDecoder), callbacks);
}

/// Issue probes on the configured interval. Returns once `requests` probes
/// have been issued; never returns when `requests` is 0.
pub async fn run(grid: &ConnectivityGrid, config: &ProbeConfig, metrics: &ServiceMetrics) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut issued = 0u64;
    loop {
        if config.requests != 0 && issued >= config.requests {
            info!(issued, "probe budget spent");
            return;
        }
        ticker.tick().await;
        issue(grid, metrics);
        issued += 1;
    }
}
