//! Protocol capability set the grid is built for

use conn_pool::Protocol;

use crate::error::{Error, Result};

/// The protocols a grid is allowed to negotiate with its upstream.
///
/// Only the exact set {HTTP/1.1, HTTP/2, HTTP/3} is supported, which yields the
/// fixed HTTP/3 → HTTP/1.1-or-HTTP/2 topology. Order is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityOptions {
    protocols: Vec<Protocol>,
}

impl ConnectivityOptions {
    pub fn new(protocols: Vec<Protocol>) -> Self {
        Self { protocols }
    }

    /// The only supported capability set.
    pub fn http3_with_fallback() -> Self {
        Self::new(vec![Protocol::Http11, Protocol::Http2, Protocol::Http3])
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// Check that the protocol set is exactly {HTTP/1.1, HTTP/2, HTTP/3}.
    pub fn validate(&self) -> Result<()> {
        let required = [Protocol::Http11, Protocol::Http2, Protocol::Http3];
        let complete = self.protocols.len() == required.len()
            && required.iter().all(|p| self.protocols.contains(p));
        if complete {
            return Ok(());
        }
        let labels: Vec<&str> = self.protocols.iter().map(Protocol::label).collect();
        Err(Error::UnsupportedTopology(labels.join(", ")))
    }
}
