//! Service-specific error types

use std::net::SocketAddr;

use thiserror::Error;

/// Grid probe lifecycle errors.
///
/// Per-probe failures are counted and logged by the probe callbacks; they
/// never propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to bind admin listener on {addr}: {source}")]
    AdminBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("admin server failed: {0}")]
    AdminServe(#[source] std::io::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
