//! Connectivity grid for a single upstream host
//!
//! Tries to open each stream over HTTP/3 first and falls back to a pool that
//! negotiates HTTP/1.1 or HTTP/2, without exposing the tiers to the caller.
//! The grid is itself a `ConnectionPool`, so it drops in wherever a single
//! protocol pool would.
//!
//! Request lifecycle:
//! 1. `new_stream` creates the HTTP/3 tier on first use and a retry controller
//!    for the request, which attempts the stream on tier 0
//! 2. A tier failure moves the controller to the next tier, creating it lazily
//! 3. The first success, or the failure of the last tier, is delivered to the
//!    caller exactly once; a cancelled request gets no callback at all
//! 4. Registering a drained callback freezes tier creation; the grid reports
//!    drained once every existing tier has

pub mod error;
mod grid;
mod options;
mod retry;
mod stats;
mod tier;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use grid::{ConnectivityGrid, Lifecycle, NO_TIER_AVAILABLE};
pub use options::ConnectivityOptions;
pub use tier::{Tier, TierContext, TierFactory};
