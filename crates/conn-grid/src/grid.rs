//! Connectivity grid: ordered tiers with sequential fallback
//!
//! The grid owns an append-only list of tiers (HTTP/3 first, then the mixed
//! HTTP/1.1-or-HTTP/2 pool), created lazily the first time a request needs
//! them. Each stream request gets a `RetryController` that walks the tiers one
//! at a time; the caller only ever sees the final outcome.
//!
//! Draining is aggregated: the first drained callback registered on the grid
//! freezes the tier list, subscribes to every tier's drain, and the grid's
//! subscribers fire once all of those tiers have drained.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use conn_pool::{
    Cancellable, ConnectionOptions, ConnectionPool, ConnectivityState, DrainedCallback,
    HostHandle, PoolCallbacks, PoolFailureReason, ResourcePriority, ResponseDecoderHandle,
};
use tracing::{debug, info, warn};

use crate::options::ConnectivityOptions;
use crate::retry::{self, ControllerId, GridCancelHandle, RetryController};
use crate::stats::{self, Outcome};
use crate::tier::{Tier, TierContext, TierFactory};

/// Transport failure detail reported when a request arrives after tier
/// creation was frozen and no tier exists.
pub const NO_TIER_AVAILABLE: &str = "no connectivity grid tier available";

/// Lifecycle of a grid.
///
/// Transitions:
/// - Active → Draining (first drained callback registered; tier creation frozen)
/// - Active | Draining → Destroyed (grid dropped)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Draining,
    Destroyed,
}

impl Lifecycle {
    pub fn label(&self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Draining => "draining",
            Lifecycle::Destroyed => "destroyed",
        }
    }
}

/// Shared grid state. Pool callbacks and cancel handles reach it through a
/// `Weak`; the `ConnectivityGrid` holds the only strong reference.
pub(crate) struct GridInner {
    ctx: TierContext,
    factory: Box<dyn TierFactory>,
    /// Tiers in priority order. Only ever appended to.
    tiers: RefCell<Vec<Rc<dyn ConnectionPool>>>,
    /// Owning map of in-flight requests.
    pub(crate) controllers: RefCell<HashMap<ControllerId, RetryController>>,
    next_controller_id: Cell<u64>,
    /// Subscribers waiting for the grid to drain.
    drained_callbacks: RefCell<Vec<DrainedCallback>>,
    /// Tiers still to report drained. Set when the first subscriber registers.
    drains_needed: Cell<usize>,
    lifecycle: Cell<Lifecycle>,
}

impl GridInner {
    pub(crate) fn host(&self) -> &HostHandle {
        &self.ctx.host
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    fn tier_count(&self) -> usize {
        self.tiers.borrow().len()
    }

    fn tier(&self, index: usize) -> Option<Rc<dyn ConnectionPool>> {
        self.tiers.borrow().get(index).cloned()
    }

    fn tiers_snapshot(&self) -> Vec<Rc<dyn ConnectionPool>> {
        self.tiers.borrow().clone()
    }

    /// Create the next tier in priority order, or `None` if every tier exists
    /// or tier creation is frozen.
    pub(crate) fn create_next_tier(&self) -> Option<(usize, Rc<dyn ConnectionPool>)> {
        if self.lifecycle.get() != Lifecycle::Active {
            debug!(
                host = %self.ctx.host.hostname,
                lifecycle = self.lifecycle.get().label(),
                "tier creation frozen"
            );
            return None;
        }
        let index = self.tier_count();
        let tier = Tier::from_index(index)?;

        let pool = self.factory.create_tier(tier, &self.ctx);
        self.tiers.borrow_mut().push(Rc::clone(&pool));
        info!(
            host = %self.ctx.host.hostname,
            tier = tier.label(),
            index,
            "connectivity grid tier created"
        );
        stats::record_tier_created(tier);
        Some((index, pool))
    }

    /// The tier after `current`, creating it if needed.
    pub(crate) fn next_tier(&self, current: usize) -> Option<(usize, Rc<dyn ConnectionPool>)> {
        let next = current + 1;
        if let Some(pool) = self.tier(next) {
            return Some((next, pool));
        }
        self.create_next_tier()
    }

    fn new_stream(
        self: &Rc<Self>,
        decoder: ResponseDecoderHandle,
        callbacks: Box<dyn PoolCallbacks>,
    ) -> Option<Box<dyn Cancellable>> {
        if self.tier_count() == 0 {
            self.create_next_tier();
        }
        // Requests always start at the highest priority tier.
        let Some(first) = self.tier(0) else {
            warn!(
                host = %self.ctx.host.hostname,
                lifecycle = self.lifecycle.get().label(),
                "stream requested with no tier available"
            );
            stats::record_outcome(Outcome::Failure);
            callbacks.on_pool_failure(
                PoolFailureReason::LocalConnectionFailure,
                NO_TIER_AVAILABLE,
                self.ctx.host.clone(),
            );
            return None;
        };

        let id = ControllerId(self.next_controller_id.get());
        self.next_controller_id.set(id.0 + 1);
        self.controllers
            .borrow_mut()
            .insert(id, RetryController::new(decoder, callbacks));

        retry::issue_attempt(self, id, 0, first);

        if !self.controllers.borrow().contains_key(&id) {
            // Completed before the first pool returned.
            return None;
        }
        Some(Box::new(GridCancelHandle {
            grid: Rc::downgrade(self),
            id,
        }))
    }

    fn add_drained_callback(self: &Rc<Self>, callback: DrainedCallback) {
        let first = self.lifecycle.get() == Lifecycle::Active;
        self.drained_callbacks.borrow_mut().push(callback);

        if !first {
            return;
        }

        // First subscriber: track how many tiers must drain before the grid
        // reports drained. No tier can be created from here on.
        self.lifecycle.set(Lifecycle::Draining);
        let tiers = self.tiers_snapshot();
        self.drains_needed.set(tiers.len());
        info!(
            host = %self.ctx.host.hostname,
            tiers = tiers.len(),
            "drain subscriber registered, tier creation frozen"
        );

        // With no tier there is no drain to wait for: subscribers stay
        // recorded and are never invoked.
        for tier in tiers {
            let grid = Rc::downgrade(self);
            tier.add_drained_callback(Box::new(move || {
                if let Some(grid) = grid.upgrade() {
                    grid.on_drain_received();
                }
            }));
        }
    }

    /// Called by each tier as it drains.
    fn on_drain_received(&self) {
        // Tiers released by the destructor may report drained; ignore them.
        if self.lifecycle.get() == Lifecycle::Destroyed {
            return;
        }

        let needed = self.drains_needed.get();
        assert!(
            needed != 0,
            "connectivity grid received more tier drains than it subscribed to"
        );
        self.drains_needed.set(needed - 1);
        if needed - 1 != 0 {
            debug!(
                host = %self.ctx.host.hostname,
                remaining = needed - 1,
                "tier drained, waiting for remaining tiers"
            );
            return;
        }

        info!(host = %self.ctx.host.hostname, "all tiers drained");
        stats::record_drain_completed();
        self.notify_drained();
    }

    /// Invoke every subscriber registered so far, in registration order.
    ///
    /// Subscribers registered from inside a callback land in a fresh list and
    /// are not part of this notification.
    fn notify_drained(&self) {
        let callbacks = std::mem::take(&mut *self.drained_callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }
}

/// HTTP connection pool that tries HTTP/3 first and falls back to an
/// HTTP/1.1-or-HTTP/2 pool, one attempt at a time.
///
/// Event-loop local (`!Send`). New requests always start at the HTTP/3 tier,
/// whatever happened to earlier requests. Preconnect is not supported.
pub struct ConnectivityGrid {
    inner: Rc<GridInner>,
}

impl ConnectivityGrid {
    /// Build a grid for `host`.
    ///
    /// # Panics
    ///
    /// If `connectivity_options` is not exactly {HTTP/1.1, HTTP/2, HTTP/3}.
    /// Callers that take the protocol set from configuration should run
    /// `ConnectivityOptions::validate` first.
    pub fn new(
        host: HostHandle,
        priority: ResourcePriority,
        options: ConnectionOptions,
        state: Rc<ConnectivityState>,
        connectivity_options: ConnectivityOptions,
        factory: Box<dyn TierFactory>,
    ) -> Self {
        if let Err(e) = connectivity_options.validate() {
            panic!("invalid connectivity grid topology: {e}");
        }
        debug!(
            host = %host.hostname,
            priority = priority.label(),
            "connectivity grid created"
        );
        Self {
            inner: Rc::new(GridInner {
                ctx: TierContext {
                    host,
                    priority,
                    options,
                    state,
                },
                factory,
                tiers: RefCell::new(Vec::new()),
                controllers: RefCell::new(HashMap::new()),
                next_controller_id: Cell::new(0),
                drained_callbacks: RefCell::new(Vec::new()),
                drains_needed: Cell::new(0),
                lifecycle: Cell::new(Lifecycle::Active),
            }),
        }
    }

    /// Create the next tier in priority order. Returns its index, or `None`
    /// once both tiers exist or a drained callback has been registered.
    pub fn create_next_tier(&self) -> Option<usize> {
        self.inner.create_next_tier().map(|(index, _)| index)
    }

    /// Number of tiers created so far.
    pub fn tier_count(&self) -> usize {
        self.inner.tier_count()
    }

    /// Number of stream requests that have neither completed nor been cancelled.
    pub fn pending_requests(&self) -> usize {
        self.inner.controllers.borrow().len()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }
}

impl ConnectionPool for ConnectivityGrid {
    fn has_active_connections(&self) -> bool {
        // O(tiers), and there are at most two.
        self.inner
            .tiers_snapshot()
            .iter()
            .any(|tier| tier.has_active_connections())
    }

    fn new_stream(
        &self,
        decoder: ResponseDecoderHandle,
        callbacks: Box<dyn PoolCallbacks>,
    ) -> Option<Box<dyn Cancellable>> {
        self.inner.new_stream(decoder, callbacks)
    }

    fn add_drained_callback(&self, callback: DrainedCallback) {
        self.inner.add_drained_callback(callback);
    }

    fn drain_connections(&self) {
        let tiers = self.inner.tiers_snapshot();
        debug!(
            host = %self.inner.ctx.host.hostname,
            tiers = tiers.len(),
            "draining connectivity grid"
        );
        for tier in tiers {
            tier.drain_connections();
        }
    }

    fn host(&self) -> HostHandle {
        self.inner.ctx.host.clone()
    }

    fn maybe_preconnect(&self, _ratio: f32) -> bool {
        // Preconnect across tiers is not supported.
        false
    }
}

impl Drop for ConnectivityGrid {
    fn drop(&mut self) {
        // Ignore drain notifications while the tiers are released below.
        self.inner.lifecycle.set(Lifecycle::Destroyed);
        let tiers = std::mem::take(&mut *self.inner.tiers.borrow_mut());
        drop(tiers);
        let controllers = std::mem::take(&mut *self.inner.controllers.borrow_mut());
        if !controllers.is_empty() {
            debug!(
                host = %self.inner.ctx.host.hostname,
                pending = controllers.len(),
                "connectivity grid destroyed with requests in flight"
            );
        }
        drop(controllers);
    }
}
