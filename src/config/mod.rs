//! Configuration management for portal-offline
//!
//! The deployment environment is an explicit configuration value resolved once
//! at process start (flag > env var > file > default) and injected from there.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Default portal API origin
pub const DEFAULT_API_BASE_URL: &str = "https://portal.example.com";

/// Default cache generation tag
pub const DEFAULT_CACHE_VERSION: &str = "v1";

/// Deployment environment the layer runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Development,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Portal origin used to resolve relative request paths
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Cache generation tag, bumped by deployments to force a cutover
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Override for where cache.db and state.db live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Upper bound for every network-first attempt
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Page served when a navigation misses both cache and network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_page: Option<String>,

    /// Offline queue tuning
    #[serde(default)]
    pub queue: QueueSettings,
}

/// Retry and concurrency limits for the offline queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Failed attempts before an item is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for any single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Endpoints drained in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_cache_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}

fn default_network_timeout_ms() -> u64 {
    8_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    5 * 60 * 1000
}

fn default_concurrency() -> usize {
    4
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            api_base_url: default_api_base_url(),
            cache_version: default_cache_version(),
            data_dir: None,
            network_timeout_ms: default_network_timeout_ms(),
            offline_page: None,
            queue: QueueSettings::default(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".portal-offline").join("config.yaml"))
    }

    /// Resolve an optional override to a concrete config path
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Self::default_path(),
        }
    }

    /// Load configuration from a specific path.
    ///
    /// A missing file yields the defaults; the layer must start on a fresh
    /// device without any setup step.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(path, contents)?;

        // Set file permissions to 600 on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Reject values the layer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache_version.trim().is_empty() {
            return Err(ConfigError::Invalid("cache_version must not be empty".to_string()).into());
        }
        if self.queue.concurrency == 0 {
            return Err(
                ConfigError::Invalid("queue.concurrency must be at least 1".to_string()).into(),
            );
        }
        if self.queue.max_retries == 0 {
            return Err(
                ConfigError::Invalid("queue.max_retries must be at least 1".to_string()).into(),
            );
        }
        if self.queue.base_delay_ms > self.queue.max_delay_ms {
            return Err(ConfigError::Invalid(
                "queue.base_delay_ms exceeds queue.max_delay_ms".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Directory holding the cache and state databases
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let base = dirs::cache_dir().ok_or(ConfigError::Invalid(
                    "Could not determine cache directory".to_string(),
                ))?;
                Ok(base.join("portal-offline"))
            }
        }
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}
