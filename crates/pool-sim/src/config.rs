use std::time::Duration;

use conn_pool::{PoolFailureReason, Protocol};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// SimOutcome
// ---------------------------------------------------------------------------

/// What every stream attempt on a simulated tier ends with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SimOutcome {
    /// The stream comes up. `None` picks the tier's preferred protocol.
    Ready {
        #[serde(default)]
        protocol: Option<Protocol>,
    },
    /// The connection attempt fails.
    Fail {
        #[serde(rename = "failure_reason")]
        reason: PoolFailureReason,
        #[serde(default)]
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// SimTierConfig
// ---------------------------------------------------------------------------

/// Behaviour of one simulated tier.
///
/// Defaults to a tier that connects instantly and drains instantly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimTierConfig {
    /// Time from `new_stream` to the outcome.
    #[serde(default)]
    pub connect_delay_ms: u64,

    /// Time from `drain_connections` until the idle connections are closed.
    #[serde(default)]
    pub drain_delay_ms: u64,

    #[serde(flatten)]
    pub outcome: SimOutcome,
}

// ---

impl Default for SimTierConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: 0,
            drain_delay_ms: 0,
            outcome: SimOutcome::Ready { protocol: None },
        }
    }
}

// ---

impl SimTierConfig {
    /// Tier whose streams come up over `protocol`.
    pub fn ready(protocol: Protocol) -> Self {
        Self {
            outcome: SimOutcome::Ready {
                protocol: Some(protocol),
            },
            ..Default::default()
        }
    }

    /// Tier whose connection attempts all fail with `reason`.
    pub fn failing(reason: PoolFailureReason, detail: impl Into<String>) -> Self {
        Self {
            outcome: SimOutcome::Fail {
                reason,
                detail: detail.into(),
            },
            ..Default::default()
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }
}
