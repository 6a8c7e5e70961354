//! Service state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! Caller (main.rs) executes the I/O implied by each action.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::{Duration, Instant};

/// Probe counters shared between the event loop and the admin handlers.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub probes_issued: Arc<AtomicU64>,
    pub probes_ready: Arc<AtomicU64>,
    pub probes_failed: Arc<AtomicU64>,
    /// Probes handed to the grid that have not resolved yet.
    pub in_flight: Arc<AtomicU64>,
    /// Set once the grid drain has started; `/health` reports 503 from then on.
    pub draining: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            probes_issued: Arc::new(AtomicU64::new(0)),
            probes_ready: Arc::new(AtomicU64::new(0)),
            probes_failed: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }
}

/// Service states.
#[derive(Debug)]
pub enum ServiceState {
    /// Loading config
    Initializing,
    /// Admin endpoint up, probes flowing through the grid
    Probing { admin_addr: SocketAddr },
    /// Grid drain requested, waiting for every tier to report drained
    Draining { deadline: Instant },
    /// Terminal state
    Stopped { exit_code: i32 },
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum ServiceEvent {
    /// Configuration parsed and validated
    ConfigLoaded { admin_addr: SocketAddr },
    /// The configured probe budget has been issued
    ProbesExhausted,
    /// SIGTERM/SIGINT received
    ShutdownSignal,
    /// Every grid tier reported drained
    GridDrained,
    /// Drain deadline exceeded
    DrainTimeout,
}

/// Actions the caller should execute after a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum ServiceAction {
    /// Bind the admin listener and start probing
    StartProbing { admin_addr: SocketAddr },
    /// Subscribe to the grid drain and drain its tiers
    DrainGrid { timeout: Duration },
    /// Exit the process
    Shutdown { exit_code: i32 },
    /// No-op
    None,
}

/// How long to wait for the grid to drain after shutdown begins.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ServiceState, event: ServiceEvent) -> (ServiceState, ServiceAction) {
    match (state, event) {
        // --- Initializing ---
        (ServiceState::Initializing, ServiceEvent::ConfigLoaded { admin_addr }) => (
            ServiceState::Probing { admin_addr },
            ServiceAction::StartProbing { admin_addr },
        ),

        // --- Probing ---
        (
            ServiceState::Probing { .. },
            ServiceEvent::ShutdownSignal | ServiceEvent::ProbesExhausted,
        ) => (
            ServiceState::Draining {
                deadline: Instant::now() + DRAIN_TIMEOUT,
            },
            ServiceAction::DrainGrid {
                timeout: DRAIN_TIMEOUT,
            },
        ),

        // --- Draining ---
        (ServiceState::Draining { .. }, ServiceEvent::GridDrained | ServiceEvent::DrainTimeout) => (
            ServiceState::Stopped { exit_code: 0 },
            ServiceAction::Shutdown { exit_code: 0 },
        ),

        // A second signal while draining gives up on the drain.
        (ServiceState::Draining { .. }, ServiceEvent::ShutdownSignal) => (
            ServiceState::Stopped { exit_code: 1 },
            ServiceAction::Shutdown { exit_code: 1 },
        ),

        // --- Any other state + shutdown = stop ---
        (ServiceState::Initializing, ServiceEvent::ShutdownSignal) => (
            ServiceState::Stopped { exit_code: 0 },
            ServiceAction::Shutdown { exit_code: 0 },
        ),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, ServiceAction::None),
    }
}
