//! Error types for grid configuration

/// Errors from grid configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported protocol set [{0}]: the grid requires exactly http/1.1, h2 and h3")]
    UnsupportedTopology(String),
}

/// Result alias for grid operations.
pub type Result<T> = std::result::Result<T, Error>;
