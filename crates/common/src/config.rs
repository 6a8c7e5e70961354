//! Config file lookup and parsing shared by the services

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Pick the config file path.
///
/// Priority: the CLI argument, then the `env_var` environment variable, then
/// `default`.
pub fn resolve_path(cli_arg: Option<&str>, env_var: &str, default: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    match std::env::var(env_var) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(default),
    }
}

/// Read and deserialize a TOML file.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    let value = toml::from_str(&content)?;
    tracing::debug!(path = %path.display(), "config file parsed");
    Ok(value)
}
