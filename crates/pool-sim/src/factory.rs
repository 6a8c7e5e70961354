use std::cell::RefCell;
use std::rc::Rc;

use conn_grid::{Tier, TierContext, TierFactory};
use conn_pool::ConnectionPool;

use crate::config::SimTierConfig;
use crate::pool::SimPool;

// ---------------------------------------------------------------------------
// SimTierFactory
// ---------------------------------------------------------------------------

/// Builds a `SimPool` per tier from a fixed configuration.
///
/// Keeps a handle to every pool it creates so tests and the probe service
/// can inspect them.
#[derive(Default)]
pub struct SimTierFactory {
    http3: SimTierConfig,
    mixed: SimTierConfig,
    created: RefCell<Vec<Rc<SimPool>>>,
}

// ---

impl SimTierFactory {
    pub fn new(http3: SimTierConfig, mixed: SimTierConfig) -> Self {
        Self {
            http3,
            mixed,
            created: RefCell::new(Vec::new()),
        }
    }

    pub fn config(&self, tier: Tier) -> &SimTierConfig {
        match tier {
            Tier::Http3 => &self.http3,
            Tier::Mixed => &self.mixed,
        }
    }

    /// The pool created for `tier`, if any.
    pub fn pool(&self, tier: Tier) -> Option<Rc<SimPool>> {
        self.created
            .borrow()
            .iter()
            .find(|pool| pool.tier() == tier)
            .cloned()
    }
}

impl TierFactory for SimTierFactory {
    fn create_tier(&self, tier: Tier, ctx: &TierContext) -> Rc<dyn ConnectionPool> {
        let pool = Rc::new(SimPool::new(tier, ctx, self.config(tier).clone()));
        self.created.borrow_mut().push(Rc::clone(&pool));
        pool
    }
}
