//! Beacon configuration, loaded from `~/.visitor-beacon/config.toml`.
//!
//! Every field has a default, so a partial file (or no file at all) works.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::visitor::resolver::{DEFAULT_PROVIDER_TIMEOUT, DEFAULT_TOTAL_BUDGET};
use crate::visitor::{default_providers, FanOut, ProviderDescriptor, ResolverConfig};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_USER_AGENT: &str = concat!("VisitorBeacon/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Geolocation providers, highest priority first.
    pub providers: Vec<ProviderDescriptor>,
    /// Per-provider request timeout.
    pub provider_timeout_ms: u64,
    /// Upper bound on one whole resolution.
    pub total_budget_ms: u64,
    pub fan_out: FanOut,
    /// Timeout for the backend notification POST.
    pub notify_timeout_ms: u64,
    /// Base URL the notify-visit / notify-download endpoints live under.
    pub backend_url: String,
    pub user_agent: String,
    /// Stats file override; defaults to `~/.visitor-beacon/stats.json`.
    pub stats_path: Option<PathBuf>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT.as_millis() as u64,
            total_budget_ms: DEFAULT_TOTAL_BUDGET.as_millis() as u64,
            fan_out: FanOut::Sequential,
            notify_timeout_ms: DEFAULT_NOTIFY_TIMEOUT_MS,
            backend_url: DEFAULT_BACKEND_URL.into(),
            user_agent: DEFAULT_USER_AGENT.into(),
            stats_path: None,
        }
    }
}

impl BeaconConfig {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            providers: self.providers.clone(),
            provider_timeout: Duration::from_millis(self.provider_timeout_ms),
            total_budget: Duration::from_millis(self.total_budget_ms),
            fan_out: self.fan_out,
        }
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    /// Apply command-line resolver flags on top of file values.
    pub fn apply_overrides(&mut self, parallel: bool, timeout_ms: Option<u64>) {
        if parallel {
            self.fan_out = FanOut::Parallel;
        }
        if let Some(ms) = timeout_ms {
            self.provider_timeout_ms = ms;
        }
    }
}

/// Home of the beacon's config and state files.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".visitor-beacon")
}

pub fn default_config_path() -> PathBuf {
    state_dir().join("config.toml")
}

/// Load config from `path`, or from the default location when `None`.
pub fn load(path: Option<&Path>) -> Result<BeaconConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(BeaconConfig::default());
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    toml::from_str(&data).map_err(|source| ConfigError::Parse { path, source })
}
