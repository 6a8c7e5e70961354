//! Connectivity grid probe
//!
//! Single-binary service that:
//! 1. Builds an HTTP/3-first connectivity grid for one upstream host
//! 2. Periodically asks the grid for a stream and records which protocol won
//! 3. Serves `/health` and `/metrics`
//! 4. Drains the grid on SIGTERM/SIGINT before exiting

mod config;
mod error;
mod metrics;
mod probe;
mod service;

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use conn_grid::ConnectivityGrid;
use conn_pool::{
    ConnectionOptions, ConnectionPool, ConnectivityState, HostDescription, HostHandle,
};
use metrics_exporter_prometheus::PrometheusHandle;
use pool_sim::SimTierFactory;
use tokio::net::TcpListener;
use tokio::task::LocalSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::Error;
use crate::service::{ServiceAction, ServiceEvent, ServiceMetrics, ServiceState, handle_event};

/// How long the admin server gets to finish in-flight requests at exit.
const ADMIN_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    metrics: ServiceMetrics,
    upstream: HostHandle,
    prometheus: PrometheusHandle,
}

/// Build the admin router.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

// The grid is event-loop local, so everything runs on one thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting grid-probe");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // --- State: Initializing ---
    let state = ServiceState::Initializing;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        upstream = %config.upstream.hostname,
        address = %config.upstream.address,
        priority = config.upstream.priority.label(),
        admin_addr = %config.admin.listen_addr,
        interval_ms = config.probe.interval_ms,
        requests = config.probe.requests,
        "configuration loaded"
    );

    // Transition: Initializing -> Probing
    let (state, action) = handle_event(
        state,
        ServiceEvent::ConfigLoaded {
            admin_addr: config.admin.listen_addr,
        },
    );
    let admin_addr = match action {
        ServiceAction::StartProbing { admin_addr } => admin_addr,
        _ => anyhow::bail!("unexpected action after ConfigLoaded: {action:?}"),
    };

    let upstream: HostHandle = Arc::new(HostDescription::new(
        config.upstream.hostname.clone(),
        config.upstream.address,
    ));
    let service_metrics = ServiceMetrics::new();
    let app = build_router(
        AppState {
            metrics: service_metrics.clone(),
            upstream: Arc::clone(&upstream),
            prometheus: prometheus_handle,
        },
        config.admin.max_connections,
    );

    let listener = TcpListener::bind(admin_addr)
        .await
        .map_err(|source| Error::AdminBind {
            addr: admin_addr,
            source,
        })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(Error::AdminServe)
    });
    if let ServiceState::Probing { admin_addr } = &state {
        info!(addr = %admin_addr, "state: Probing, admin endpoint up");
    }

    let local = LocalSet::new();
    let exit_code = local
        .run_until(run_grid(
            state,
            &config,
            upstream,
            &service_metrics,
            shutdown_signal,
        ))
        .await;

    // Stop the admin server last so /health reports draining until the end.
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(ADMIN_SHUTDOWN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "admin server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "admin server task panicked"),
        Err(_) => warn!("admin server did not stop in time"),
    }

    info!(
        exit_code,
        probes_issued = service_metrics.probes_issued.load(Ordering::Relaxed),
        probes_ready = service_metrics.probes_ready.load(Ordering::Relaxed),
        probes_failed = service_metrics.probes_failed.load(Ordering::Relaxed),
        "shutdown complete"
    );
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Build the grid, probe until shutdown (or until the probe budget is spent),
/// then drain the grid. Returns the process exit code.
///
/// Must run inside a `LocalSet`. `signal` is awaited for each shutdown
/// request: once to stop probing, and again to abandon a slow drain.
async fn run_grid<F, Fut>(
    state: ServiceState,
    config: &Config,
    upstream: HostHandle,
    metrics: &ServiceMetrics,
    mut signal: F,
) -> i32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let factory = SimTierFactory::new(config.tiers.http3.clone(), config.tiers.mixed.clone());
    let grid = ConnectivityGrid::new(
        upstream,
        config.upstream.priority,
        ConnectionOptions {
            connect_timeout: config.probe.connect_timeout(),
            ..ConnectionOptions::default()
        },
        Rc::new(ConnectivityState::new()),
        config.upstream.connectivity_options(),
        Box::new(factory),
    );

    // A pending shutdown wins over the next probe tick.
    let event = tokio::select! {
        biased;
        _ = signal() => ServiceEvent::ShutdownSignal,
        _ = probe::run(&grid, &config.probe, metrics) => ServiceEvent::ProbesExhausted,
    };

    // Transition: Probing -> Draining
    let (state, action) = handle_event(state, event);
    let (ServiceState::Draining { deadline }, ServiceAction::DrainGrid { timeout }) =
        (&state, &action)
    else {
        error!(?state, ?action, "unexpected transition out of Probing");
        return 1;
    };

    metrics.draining.store(true, Ordering::Relaxed);
    crate::metrics::set_draining(true);

    let (drained_tx, drained_rx) = tokio::sync::oneshot::channel::<()>();
    grid.add_drained_callback(Box::new(move || {
        let _ = drained_tx.send(());
    }));
    grid.drain_connections();
    info!(
        tiers = grid.tier_count(),
        pending_probes = grid.pending_requests(),
        drain_timeout_secs = timeout.as_secs(),
        "state: Draining"
    );

    let deadline = tokio::time::Instant::from_std(*deadline);
    let event = if grid.tier_count() == 0 {
        // A grid without tiers never reports drained.
        ServiceEvent::GridDrained
    } else {
        tokio::select! {
            result = tokio::time::timeout_at(deadline, drained_rx) => match result {
                Ok(_) => ServiceEvent::GridDrained,
                Err(_) => ServiceEvent::DrainTimeout,
            },
            _ = signal() => ServiceEvent::ShutdownSignal,
        }
    };

    match event {
        ServiceEvent::GridDrained => info!("all grid tiers drained"),
        ServiceEvent::DrainTimeout => warn!(
            pending_probes = grid.pending_requests(),
            active_connections = grid.has_active_connections(),
            "drain timeout exceeded, forcing shutdown"
        ),
        _ => warn!("second shutdown signal, abandoning drain"),
    }

    // Transition: Draining -> Stopped
    let (state, action) = handle_event(state, event);
    if let ServiceState::Stopped { exit_code } = state {
        info!(exit_code, "state: Stopped");
    }
    // Probes still pending are dropped with the grid and get no callback.
    drop(grid);
    let abandoned = metrics.in_flight.swap(0, Ordering::Relaxed);
    if abandoned > 0 {
        warn!(abandoned, "in-flight probes abandoned with the grid");
    }
    match action {
        ServiceAction::Shutdown { exit_code } => exit_code,
        other => {
            error!(action = ?other, "unexpected action while draining");
            1
        }
    }
}

/// Health endpoint: JSON with probe counters and uptime.
/// Returns 200 while probing, 503 once the grid is draining.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.metrics;
    let draining = metrics.draining.load(Ordering::Relaxed);

    let status_code = if draining {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    let body = serde_json::json!({
        "status": if draining { "draining" } else { "probing" },
        "upstream": state.upstream.hostname,
        "upstream_address": state.upstream.address.to_string(),
        "probes_issued": metrics.probes_issued.load(Ordering::Relaxed),
        "probes_ready": metrics.probes_ready.load(Ordering::Relaxed),
        "probes_failed": metrics.probes_failed.load(Ordering::Relaxed),
        "in_flight": metrics.in_flight.load(Ordering::Relaxed),
        "uptime_seconds": metrics.started_at.elapsed().as_secs(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, ProbeConfig, TiersConfig, UpstreamConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use conn_pool::{PoolFailureReason, Protocol, ResourcePriority};
    use pool_sim::SimTierConfig;
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn test_upstream() -> HostHandle {
        Arc::new(HostDescription::new(
            "api.example.test",
            "10.0.0.7:443".parse().unwrap(),
        ))
    }

    fn test_app_state(metrics: ServiceMetrics) -> AppState {
        AppState {
            metrics,
            upstream: test_upstream(),
            prometheus: test_prometheus_handle(),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn test_config(requests: u64, tiers: TiersConfig) -> Config {
        Config {
            upstream: UpstreamConfig {
                hostname: "api.example.test".into(),
                address: "10.0.0.7:443".parse().unwrap(),
                priority: ResourcePriority::Default,
                protocols: vec![Protocol::Http11, Protocol::Http2, Protocol::Http3],
            },
            probe: ProbeConfig {
                interval_ms: 10,
                requests,
                connect_timeout_ms: 1000,
            },
            admin: AdminConfig::default(),
            tiers,
        }
    }

    fn probing() -> ServiceState {
        ServiceState::Probing {
            admin_addr: "127.0.0.1:0".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let metrics = ServiceMetrics::new();
        metrics.probes_issued.fetch_add(5, Ordering::Relaxed);
        metrics.probes_ready.fetch_add(4, Ordering::Relaxed);
        metrics.in_flight.fetch_add(1, Ordering::Relaxed);

        let app = build_router(test_app_state(metrics), 16);
        let (status, json) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "probing");
        assert_eq!(json["upstream"], "api.example.test");
        assert_eq!(json["upstream_address"], "10.0.0.7:443");
        assert_eq!(json["probes_issued"], 5);
        assert_eq!(json["probes_ready"], 4);
        assert_eq!(json["probes_failed"], 0);
        assert_eq!(json["in_flight"], 1);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn health_endpoint_reports_draining_as_unavailable() {
        let metrics = ServiceMetrics::new();
        metrics.draining.store(true, Ordering::Relaxed);

        let app = build_router(test_app_state(metrics), 16);
        let (status, json) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "draining");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let state = AppState {
            prometheus: recorder.handle(),
            ..test_app_state(ServiceMetrics::new())
        };
        {
            let _guard = ::metrics::set_default_local_recorder(&recorder);
            crate::metrics::record_probe("ready", Some(Protocol::Http3), 0.01);
        }

        let app = build_router(state, 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; version=0.0.4; charset=utf-8"
        );
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("probe_results_total"), "got: {text}");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = build_router(test_app_state(ServiceMetrics::new()), 16);
        let response = app
            .oneshot(Request::builder().uri("/v1/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_budget_then_drain_exits_cleanly() {
        let config = test_config(
            3,
            TiersConfig {
                http3: SimTierConfig::failing(PoolFailureReason::Timeout, "udp blocked"),
                mixed: SimTierConfig::ready(Protocol::Http2)
                    .with_drain_delay(Duration::from_millis(100)),
            },
        );
        let metrics = ServiceMetrics::new();

        let exit_code = LocalSet::new()
            .run_until(run_grid(
                probing(),
                &config,
                test_upstream(),
                &metrics,
                std::future::pending::<()>,
            ))
            .await;

        assert_eq!(exit_code, 0);
        assert!(metrics.draining.load(Ordering::Relaxed));
        assert_eq!(metrics.probes_issued.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.probes_ready.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn signal_stops_probing_and_drains() {
        let config = test_config(0, TiersConfig::default());
        let metrics = ServiceMetrics::new();

        let exit_code = LocalSet::new()
            .run_until(run_grid(
                probing(),
                &config,
                test_upstream(),
                &metrics,
                || tokio::time::sleep(Duration::from_millis(35)),
            ))
            .await;

        assert_eq!(exit_code, 0);
        assert!(metrics.probes_issued.load(Ordering::Relaxed) >= 3);
        assert!(metrics.draining.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_drain_hits_timeout() {
        let config = test_config(
            1,
            TiersConfig {
                http3: SimTierConfig::ready(Protocol::Http3)
                    .with_drain_delay(Duration::from_secs(60)),
                mixed: SimTierConfig::default(),
            },
        );
        let metrics = ServiceMetrics::new();
        let started = tokio::time::Instant::now();

        let exit_code = LocalSet::new()
            .run_until(run_grid(
                probing(),
                &config,
                test_upstream(),
                &metrics,
                std::future::pending::<()>,
            ))
            .await;

        assert_eq!(exit_code, 0);
        assert!(started.elapsed() >= service::DRAIN_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probes_are_not_left_in_flight() {
        let config = test_config(
            0,
            TiersConfig {
                http3: SimTierConfig::ready(Protocol::Http3)
                    .with_connect_delay(Duration::from_millis(500)),
                mixed: SimTierConfig::default(),
            },
        );
        let metrics = ServiceMetrics::new();

        // First signal stops probing, the second abandons the drain while
        // every probe is still connecting.
        let exit_code = LocalSet::new()
            .run_until(run_grid(
                probing(),
                &config,
                test_upstream(),
                &metrics,
                || tokio::time::sleep(Duration::from_millis(35)),
            ))
            .await;

        assert_eq!(exit_code, 1);
        assert!(metrics.probes_issued.load(Ordering::Relaxed) >= 1);
        assert_eq!(metrics.probes_ready.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_without_tiers_completes_at_once() {
        let config = test_config(0, TiersConfig::default());
        let metrics = ServiceMetrics::new();

        // The signal is already pending, so no probe is issued and no tier
        // is created.
        let exit_code = LocalSet::new()
            .run_until(run_grid(
                probing(),
                &config,
                test_upstream(),
                &metrics,
                || std::future::ready(()),
            ))
            .await;

        assert_eq!(exit_code, 0);
        assert_eq!(metrics.probes_issued.load(Ordering::Relaxed), 0);
        assert!(metrics.draining.load(Ordering::Relaxed));
    }
}
