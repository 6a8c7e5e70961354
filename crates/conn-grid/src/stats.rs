//! Grid counters
//!
//! Emitted through the `metrics` facade; they are no-ops until the embedding
//! binary installs a recorder.
//!
//! - `grid_tiers_created_total` (counter): label `tier`
//! - `grid_stream_attempts_total` (counter): label `tier`
//! - `grid_tier_failovers_total` (counter): label `from_tier`
//! - `grid_stream_outcomes_total` (counter): label `outcome`
//! - `grid_drains_completed_total` (counter)

use crate::tier::Tier;

/// Terminal outcome of one stream request, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ready,
    Failure,
    Cancelled,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Ready => "ready",
            Outcome::Failure => "failure",
            Outcome::Cancelled => "cancelled",
        }
    }
}

pub(crate) fn record_tier_created(tier: Tier) {
    metrics::counter!("grid_tiers_created_total", "tier" => tier.label()).increment(1);
}

pub(crate) fn record_attempt(tier: Tier) {
    metrics::counter!("grid_stream_attempts_total", "tier" => tier.label()).increment(1);
}

pub(crate) fn record_failover(from: Tier) {
    metrics::counter!("grid_tier_failovers_total", "from_tier" => from.label()).increment(1);
}

pub(crate) fn record_outcome(outcome: Outcome) {
    metrics::counter!("grid_stream_outcomes_total", "outcome" => outcome.label()).increment(1);
}

pub(crate) fn record_drain_completed() {
    metrics::counter!("grid_drains_completed_total").increment(1);
}
