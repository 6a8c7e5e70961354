//! Tier topology and the factory that builds concrete pools

use std::rc::Rc;

use conn_pool::{
    ConnectionOptions, ConnectionPool, ConnectivityState, HostHandle, Protocol, ResourcePriority,
};

/// One slot of the fixed grid topology, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// QUIC transport, HTTP/3 only.
    Http3,
    /// TCP transport, HTTP/1.1 or HTTP/2 picked by ALPN.
    Mixed,
}

impl Tier {
    /// Creation order. Index 0 is tried first.
    pub const ORDER: [Tier; 2] = [Tier::Http3, Tier::Mixed];

    /// The tier at `index` in creation order, if the topology has one.
    pub fn from_index(index: usize) -> Option<Tier> {
        Self::ORDER.get(index).copied()
    }

    /// Protocols a pool for this tier can negotiate.
    pub fn protocols(&self) -> &'static [Protocol] {
        match self {
            Tier::Http3 => &[Protocol::Http3],
            Tier::Mixed => &[Protocol::Http11, Protocol::Http2],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Http3 => "h3",
            Tier::Mixed => "mixed",
        }
    }
}

/// Everything latched at grid construction that a tier needs to be built.
#[derive(Debug, Clone)]
pub struct TierContext {
    pub host: HostHandle,
    pub priority: ResourcePriority,
    pub options: ConnectionOptions,
    pub state: Rc<ConnectivityState>,
}

/// Builds the concrete pool behind a tier.
pub trait TierFactory {
    fn create_tier(&self, tier: Tier, ctx: &TierContext) -> Rc<dyn ConnectionPool>;
}

impl<F: TierFactory + ?Sized> TierFactory for Rc<F> {
    fn create_tier(&self, tier: Tier, ctx: &TierContext) -> Rc<dyn ConnectionPool> {
        (**self).create_tier(tier, ctx)
    }
}
