//! Device/environment fingerprints for key derivation
//!
//! A fingerprint is stable across sessions on one device and distinct across
//! devices. It is not a global identity. Sources are swappable so that each
//! platform can supply its own signals without touching the vault.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::error::VaultError;

/// Storage features the environment offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageFlags {
    pub persistent: bool,
    pub key_value: bool,
    pub cache_storage: bool,
}

/// Raw signals hashed into a fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSignals {
    pub user_agent: String,
    pub locale: String,
    /// Width and height, when the platform has a screen
    pub screen: Option<(u32, u32)>,
    pub timezone_offset_minutes: i32,
    pub storage: StorageFlags,
    /// Platform device id, when one exists
    pub device_id: Option<String>,
}

impl EnvironmentSignals {
    /// SHA-256 over a fixed-order rendering of the signals
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(b"ua=");
        hasher.update(self.user_agent.as_bytes());
        hasher.update(b"|locale=");
        hasher.update(self.locale.as_bytes());
        hasher.update(b"|screen=");
        if let Some((w, h)) = self.screen {
            hasher.update(format!("{}x{}", w, h).as_bytes());
        }
        hasher.update(b"|tz=");
        hasher.update(self.timezone_offset_minutes.to_string().as_bytes());
        hasher.update(b"|storage=");
        hasher.update([
            self.storage.persistent as u8,
            self.storage.key_value as u8,
            self.storage.cache_storage as u8,
        ]);
        hasher.update(b"|device=");
        if let Some(ref id) = self.device_id {
            hasher.update(id.as_bytes());
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Provides the environment signals of the current device
#[async_trait]
pub trait FingerprintSource: Send + Sync {
    async fn signals(&self) -> Result<EnvironmentSignals, VaultError>;

    async fn fingerprint(&self) -> Result<String, VaultError> {
        Ok(self.signals().await?.fingerprint())
    }
}

/// Fingerprint of the machine running this process
pub struct HostFingerprint {
    data_dir: PathBuf,
}

const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

impl HostFingerprint {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn locale() -> String {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.is_empty())
            .map(|v| v.split('.').next().unwrap_or_default().replace('_', "-"))
            .unwrap_or_else(|| "en-US".to_string())
    }

    fn device_id() -> Option<String> {
        MACHINE_ID_PATHS
            .iter()
            .filter_map(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
    }
}

#[async_trait]
impl FingerprintSource for HostFingerprint {
    async fn signals(&self) -> Result<EnvironmentSignals, VaultError> {
        let persistent = self.data_dir.is_dir();

        let signals = EnvironmentSignals {
            user_agent: format!(
                "portal-offline ({}; {})",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            locale: Self::locale(),
            screen: None,
            timezone_offset_minutes: chrono::Local::now().offset().local_minus_utc() / 60,
            storage: StorageFlags {
                persistent,
                key_value: persistent,
                cache_storage: persistent,
            },
            device_id: Self::device_id(),
        };

        if signals.device_id.is_none() && !persistent {
            return Err(VaultError::CryptoUnavailable(
                "no stable device identity available".to_string(),
            ));
        }

        Ok(signals)
    }
}

/// Fixed signals
#[cfg(test)]
pub struct StaticFingerprint(pub EnvironmentSignals);

#[cfg(test)]
#[async_trait]
impl FingerprintSource for StaticFingerprint {
    async fn signals(&self) -> Result<EnvironmentSignals, VaultError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
pub(crate) fn test_signals() -> EnvironmentSignals {
    EnvironmentSignals {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0".to_string(),
        locale: "de-DE".to_string(),
        screen: Some((1920, 1080)),
        timezone_offset_minutes: 60,
        storage: StorageFlags {
            persistent: true,
            key_value: true,
            cache_storage: true,
        },
        device_id: None,
    }
}
