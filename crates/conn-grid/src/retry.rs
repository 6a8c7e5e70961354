//! Per-request retry controller
//!
//! A `RetryController` follows one caller's stream request down the tiers:
//! it issues the attempt on the current tier, turns a tier failure into an
//! attempt on the next tier, and hands the first success (or the last failure)
//! to the caller. The grid owns every controller in a map keyed by
//! `ControllerId`; the pool callbacks and the caller's cancel handle only carry
//! the id plus a weak reference to the grid.
//!
//! States:
//! - Attempting(tier) → Attempting(tier + 1) (tier failed, a next tier exists)
//! - Attempting(tier) → Failed (tier failed, no next tier)
//! - Attempting(tier) → Delivered (tier reported ready)
//! - Attempting(tier) → Cancelled (caller cancelled)
//!
//! Every terminal transition removes the controller from the grid's map before
//! anything is forwarded to the caller, so the caller may re-enter the grid
//! from inside its callback.

use std::fmt;
use std::rc::{Rc, Weak};

use conn_pool::{
    CancelPolicy, Cancellable, ConnectionPool, HostHandle, PoolCallbacks, PoolFailureReason,
    Protocol, RequestEncoder, ResponseDecoderHandle, StreamInfo,
};
use tracing::{debug, warn};

use crate::grid::{GridInner, Lifecycle};
use crate::stats::{self, Outcome};
use crate::tier::Tier;

/// Key of a controller in the grid's owning map. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ControllerId(pub(crate) u64);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of one in-flight stream request.
pub(crate) struct RetryController {
    /// Response consumer from the original request, reused on every tier.
    decoder: ResponseDecoderHandle,
    /// The caller's callbacks; consumed by the terminal outcome.
    callbacks: Box<dyn PoolCallbacks>,
    /// Tier currently being attempted.
    tier_index: usize,
    /// Cancel handle for the attempt on `tier_index`, owned by that tier's pool.
    /// `None` until the pool returns one.
    cancellable: Option<Box<dyn Cancellable>>,
}

impl RetryController {
    pub(crate) fn new(decoder: ResponseDecoderHandle, callbacks: Box<dyn PoolCallbacks>) -> Self {
        Self {
            decoder,
            callbacks,
            tier_index: 0,
            cancellable: None,
        }
    }

    pub(crate) fn tier_index(&self) -> usize {
        self.tier_index
    }
}

fn tier_label(index: usize) -> &'static str {
    Tier::from_index(index).map_or("unknown", |t| t.label())
}

/// Issue the controller's stream request against `pool`, the tier at `tier_index`.
///
/// The pool may deliver the outcome before `new_stream` returns; in that case
/// the controller has already moved on (or is gone) and the returned handle,
/// if any, is stale.
pub(crate) fn issue_attempt(
    grid: &Rc<GridInner>,
    id: ControllerId,
    tier_index: usize,
    pool: Rc<dyn ConnectionPool>,
) {
    let decoder = {
        let mut controllers = grid.controllers.borrow_mut();
        let Some(controller) = controllers.get_mut(&id) else {
            return;
        };
        controller.tier_index = tier_index;
        controller.cancellable = None;
        controller.decoder.clone()
    };

    debug!(
        host = %grid.host().hostname,
        controller = %id,
        tier = tier_label(tier_index),
        "starting stream attempt"
    );
    if let Some(tier) = Tier::from_index(tier_index) {
        stats::record_attempt(tier);
    }

    let callbacks = Box::new(AttemptCallbacks {
        grid: Rc::downgrade(grid),
        id,
        tier_index,
    });
    let Some(handle) = pool.new_stream(decoder, callbacks) else {
        return;
    };

    let mut controllers = grid.controllers.borrow_mut();
    match controllers.get_mut(&id) {
        Some(controller) if controller.tier_index == tier_index => {
            controller.cancellable = Some(handle);
        }
        _ => {
            warn!(
                controller = %id,
                tier = tier_label(tier_index),
                "pool returned a cancel handle for an attempt it already completed"
            );
        }
    }
}

/// Sink handed to a tier's pool for one attempt.
///
/// Routes the pool's outcome back to the controller, provided the controller
/// still exists and is still attempting the same tier.
struct AttemptCallbacks {
    grid: Weak<GridInner>,
    id: ControllerId,
    tier_index: usize,
}

impl AttemptCallbacks {
    /// The grid, if it is alive and this attempt is still the controller's
    /// current one.
    fn current_grid(&self) -> Option<Rc<GridInner>> {
        let grid = self.grid.upgrade()?;
        if grid.lifecycle() == Lifecycle::Destroyed {
            return None;
        }
        let current = grid
            .controllers
            .borrow()
            .get(&self.id)
            .map(RetryController::tier_index);
        if current != Some(self.tier_index) {
            debug!(
                controller = %self.id,
                tier = tier_label(self.tier_index),
                "ignoring outcome for a stale attempt"
            );
            return None;
        }
        Some(grid)
    }
}

impl PoolCallbacks for AttemptCallbacks {
    fn on_pool_failure(
        self: Box<Self>,
        reason: PoolFailureReason,
        transport_failure_reason: &str,
        host: HostHandle,
    ) {
        let Some(grid) = self.current_grid() else {
            return;
        };

        // See if there is a lower priority tier to try.
        if let Some((next_index, pool)) = grid.next_tier(self.tier_index) {
            debug!(
                controller = %self.id,
                failed_tier = tier_label(self.tier_index),
                next_tier = tier_label(next_index),
                reason = reason.label(),
                transport_failure_reason,
                "tier failed, retrying on next tier"
            );
            if let Some(tier) = Tier::from_index(self.tier_index) {
                stats::record_failover(tier);
            }
            issue_attempt(&grid, self.id, next_index, pool);
            return;
        }

        // Every tier has been tried. Pass the failure up to the original caller.
        let controller = grid.controllers.borrow_mut().remove(&self.id);
        let Some(controller) = controller else {
            return;
        };
        warn!(
            host = %host.hostname,
            controller = %self.id,
            tier = tier_label(self.tier_index),
            reason = reason.label(),
            transport_failure_reason,
            "all tiers failed"
        );
        stats::record_outcome(Outcome::Failure);
        controller
            .callbacks
            .on_pool_failure(reason, transport_failure_reason, host);
    }

    fn on_pool_ready(
        self: Box<Self>,
        encoder: Box<dyn RequestEncoder>,
        host: HostHandle,
        info: &StreamInfo,
        protocol: Option<Protocol>,
    ) {
        let Some(grid) = self.current_grid() else {
            return;
        };
        let controller = grid.controllers.borrow_mut().remove(&self.id);
        let Some(controller) = controller else {
            return;
        };

        debug!(
            host = %host.hostname,
            controller = %self.id,
            tier = tier_label(self.tier_index),
            protocol = protocol.map(|p| p.label()),
            connect_ms = info.connect_duration.as_millis() as u64,
            "stream ready"
        );
        stats::record_outcome(Outcome::Ready);
        controller
            .callbacks
            .on_pool_ready(encoder, host, info, protocol);
    }
}

/// Cancel handle given to the caller of `ConnectivityGrid::new_stream`.
pub(crate) struct GridCancelHandle {
    pub(crate) grid: Weak<GridInner>,
    pub(crate) id: ControllerId,
}

impl Cancellable for GridCancelHandle {
    fn cancel(self: Box<Self>, policy: CancelPolicy) {
        let Some(grid) = self.grid.upgrade() else {
            return;
        };
        let controller = grid.controllers.borrow_mut().remove(&self.id);
        let Some(controller) = controller else {
            debug!(controller = %self.id, "cancel after the request already completed");
            return;
        };

        debug!(
            controller = %self.id,
            tier = tier_label(controller.tier_index),
            ?policy,
            "stream request cancelled"
        );
        stats::record_outcome(Outcome::Cancelled);
        if let Some(cancellable) = controller.cancellable {
            cancellable.cancel(policy);
        }
    }
}
