//! Common types for the connectivity grid services

mod config;
mod error;

pub use config::{load_toml, resolve_path};
pub use error::{Error, Result};
