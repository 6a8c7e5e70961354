//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use conn_grid::ConnectivityOptions;
use conn_pool::{Protocol, ResourcePriority};
use pool_sim::SimTierConfig;
use serde::Deserialize;

/// Environment variable overriding `admin.listen_addr`.
pub const ADMIN_ADDR_ENV: &str = "GRID_PROBE_ADMIN_ADDR";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub tiers: TiersConfig,
}

/// The host the grid connects to
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub hostname: String,
    pub address: SocketAddr,
    #[serde(default)]
    pub priority: ResourcePriority,
    #[serde(default = "default_protocols")]
    pub protocols: Vec<Protocol>,
}

/// Probe stream schedule
#[derive(Debug, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Number of probes to issue before draining; 0 probes until shutdown.
    #[serde(default)]
    pub requests: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Admin HTTP endpoint settings
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Scripted behaviour of each grid tier
#[derive(Debug, Default, Deserialize)]
pub struct TiersConfig {
    #[serde(default)]
    pub http3: SimTierConfig,
    #[serde(default)]
    pub mixed: SimTierConfig,
}

fn default_protocols() -> Vec<Protocol> {
    vec![Protocol::Http11, Protocol::Http2, Protocol::Http3]
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9901))
}

fn default_max_connections() -> usize {
    64
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            requests: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl UpstreamConfig {
    pub fn connectivity_options(&self) -> ConnectivityOptions {
        ConnectivityOptions::new(self.protocols.clone())
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = common::load_toml(path)?;

        if let Ok(addr) = std::env::var(ADMIN_ADDR_ENV) {
            config.admin.listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("{ADMIN_ADDR_ENV} is not a socket address: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.upstream.hostname.trim().is_empty() {
            return Err(common::Error::Config(
                "upstream.hostname must not be empty".into(),
            ));
        }

        self.upstream
            .connectivity_options()
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if self.probe.interval_ms == 0 {
            return Err(common::Error::Config(
                "probe.interval_ms must be greater than 0".into(),
            ));
        }

        if self.probe.connect_timeout_ms == 0 {
            return Err(common::Error::Config(
                "probe.connect_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.admin.max_connections == 0 {
            return Err(common::Error::Config(
                "admin.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        common::resolve_path(cli_path, "CONFIG_PATH", "grid-probe.toml")
    }
}
