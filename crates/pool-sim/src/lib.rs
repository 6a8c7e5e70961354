//! In-process simulated connection pools for exercising the connectivity grid.
//!
//! [`SimPool`] implements [`conn_pool::ConnectionPool`] with tokio timers
//! instead of sockets. [`SimTierConfig`] scripts what a tier does:
//!
//! - Delay before each stream attempt resolves
//! - Whether attempts come up (and over which protocol) or fail
//! - Delay before a drain completes
//!
//! [`SimTierFactory`] plugs a pair of configs into a
//! [`conn_grid::ConnectivityGrid`]. Everything runs on a tokio `LocalSet`.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use conn_pool::{PoolFailureReason, Protocol};
//! use pool_sim::{SimTierConfig, SimTierFactory};
//!
//! let factory = SimTierFactory::new(
//!     SimTierConfig::failing(PoolFailureReason::Timeout, "udp blocked"),
//!     SimTierConfig::ready(Protocol::Http2),
//! );
//! ```

mod config;
mod factory;
mod pool;

// --- public API
pub use config::{SimOutcome, SimTierConfig};
pub use factory::SimTierFactory;
pub use pool::{CONNECT_TIMEOUT_DETAIL, SimPool};
