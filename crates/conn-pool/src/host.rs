//! Upstream host description and per-cluster connection bookkeeping

use std::cell::Cell;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

/// The upstream endpoint a pool connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescription {
    pub hostname: String,
    pub address: SocketAddr,
}

impl HostDescription {
    pub fn new(hostname: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            hostname: hostname.into(),
            address,
        }
    }
}

impl fmt::Display for HostDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.address)
    }
}

/// Shared, cheaply cloned host descriptor handed to callbacks.
pub type HostHandle = Arc<HostDescription>;

/// Resource priority class a pool was created for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePriority {
    #[default]
    Default,
    High,
}

impl ResourcePriority {
    pub fn label(&self) -> &'static str {
        match self {
            ResourcePriority::Default => "default",
            ResourcePriority::High => "high",
        }
    }
}

/// Socket-level options latched at pool creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Connectivity accumulator shared by every pool of one cluster.
///
/// Pools bump these counters as streams queue and connections come and go, so
/// the cluster can reason about total load across protocols. Event-loop local:
/// plain `Cell`s, no atomics.
#[derive(Debug, Default)]
pub struct ConnectivityState {
    pending_streams: Cell<u64>,
    active_streams: Cell<u64>,
    active_connections: Cell<u64>,
}

impl ConnectivityState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_pending_streams(&self) {
        self.pending_streams.set(self.pending_streams.get() + 1);
    }

    pub fn decr_pending_streams(&self) {
        self.pending_streams
            .set(self.pending_streams.get().saturating_sub(1));
    }

    pub fn incr_active_streams(&self) {
        self.active_streams.set(self.active_streams.get() + 1);
    }

    pub fn decr_active_streams(&self) {
        self.active_streams
            .set(self.active_streams.get().saturating_sub(1));
    }

    pub fn incr_active_connections(&self) {
        self.active_connections
            .set(self.active_connections.get() + 1);
    }

    pub fn decr_active_connections(&self) {
        self.active_connections
            .set(self.active_connections.get().saturating_sub(1));
    }

    pub fn pending_streams(&self) -> u64 {
        self.pending_streams.get()
    }

    pub fn active_streams(&self) -> u64 {
        self.active_streams.get()
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.get()
    }
}
