//! Error types for the offline resilience layer

use std::time::Duration;
use thiserror::Error;

/// Result type alias for portal-offline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Neither the cache nor the network could answer the request
    #[error("Resource unavailable offline: {0}")]
    ResourceUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Interactive prompt error: {0}")]
    Dialoguer(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

impl From<dialoguer::Error> for Error {
    fn from(err: dialoguer::Error) -> Self {
        Error::Dialoguer(err.to_string())
    }
}

/// Outcome of a failed network attempt.
///
/// Transport failures come straight from the network layer. Status-based
/// failures are produced by [`crate::network::NetResponse::check`].
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Rate limit exceeded. Retry after {0:?}")]
    RateLimit(Duration),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether a later attempt of the same request could succeed.
    ///
    /// Connectivity failures, timeouts, 5xx and 429 are transient. Everything
    /// else is an application-level rejection that must not be replayed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Offline(_)
                | FetchError::Timeout(_)
                | FetchError::Server { .. }
                | FetchError::RateLimit(_)
        )
    }

    /// Minimum delay the server asked for before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimit(wait) => Some(*wait),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Offline("Request timed out".to_string())
        } else if err.is_connect() {
            FetchError::Offline("Failed to connect".to_string())
        } else if err.is_builder() {
            FetchError::InvalidRequest(err.to_string())
        } else {
            FetchError::Offline(err.to_string())
        }
    }
}

/// Response cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(String),

    #[error("Cache database error: {0}")]
    Database(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Database(err.to_string())
    }
}

/// Persistent key-value store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Store database error: {0}")]
    Database(String),

    #[error("Corrupt record {key} in {collection}: {message}")]
    Corrupt {
        collection: String,
        key: String,
        message: String,
    },

    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Credential vault errors
#[derive(Debug, Error)]
pub enum VaultError {
    /// Cryptographic primitives or device identity are missing. The vault is
    /// unusable; there is no plaintext fallback.
    #[error("Cryptography unavailable: {0}")]
    CryptoUnavailable(String),

    /// The stored credential can no longer be opened and must be reissued.
    #[error("Stored credential is invalid. Sign in again.")]
    DecryptionFailed,

    #[error("No credential stored. Sign in first.")]
    NoCredential,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Offline queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(String),

    #[error("Queue item {0} is not dead-lettered")]
    NotDeadLettered(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(FetchError::Offline("down".to_string()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(
            FetchError::Server {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_retryable()
        );
        assert!(FetchError::RateLimit(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn test_rejections_are_not_retryable() {
        let err = FetchError::Rejected {
            status: 422,
            message: "title required".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!FetchError::InvalidRequest("bad url".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        assert_eq!(
            FetchError::RateLimit(Duration::from_secs(30)).retry_after(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(FetchError::Offline("x".to_string()).retry_after(), None);
    }

    #[test]
    fn test_rate_limit_message() {
        let msg = FetchError::RateLimit(Duration::from_secs(30)).to_string();
        assert!(msg.contains("Rate limit"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_decryption_failed_asks_for_sign_in() {
        assert!(VaultError::DecryptionFailed.to_string().contains("Sign in"));
    }

    #[test]
    fn test_error_from_vault_error() {
        let err: Error = VaultError::DecryptionFailed.into();
        match err {
            Error::Vault(VaultError::DecryptionFailed) => (),
            _ => panic!("Expected Error::Vault(VaultError::DecryptionFailed)"),
        }
    }

    #[test]
    fn test_error_from_fetch_error() {
        let err: Error = FetchError::Offline("down".to_string()).into();
        assert!(matches!(err, Error::Fetch(FetchError::Offline(_))));
    }

    #[test]
    fn test_store_error_converts_into_vault_and_queue() {
        let vault: VaultError = StoreError::Poisoned.into();
        assert!(matches!(vault, VaultError::Store(StoreError::Poisoned)));
        let queue: QueueError = StoreError::Poisoned.into();
        assert!(matches!(queue, QueueError::Store(StoreError::Poisoned)));
    }

    #[test]
    fn test_resource_unavailable_message() {
        let err = Error::ResourceUnavailable("https://portal/docs".to_string());
        assert!(err.to_string().contains("https://portal/docs"));
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_str = "invalid: [yaml: content";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let config_err: ConfigError = yaml_err.into();

        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }
}
