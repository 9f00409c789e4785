//! Encrypted credential vault
//!
//! The bearer token is stored AES-256-GCM encrypted under a key derived from
//! the user's identity and the device fingerprint (see [`kdf`]). The salt is
//! created once per profile and reused until [`TokenVault::rotate_key`];
//! every encryption draws a fresh IV. Key material only exists in memory.
//!
//! There is no plaintext fallback: if cryptography is unavailable the vault
//! fails with [`VaultError::CryptoUnavailable`].

pub mod fingerprint;
pub mod jwt;
pub mod kdf;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::VaultError;
use crate::queue::CredentialSource;
use crate::store::{AUTH_TOKENS, KvStore, base64_bytes};
pub use fingerprint::{FingerprintSource, HostFingerprint};
#[cfg(test)]
pub use fingerprint::{EnvironmentSignals, StaticFingerprint};
use kdf::{DerivedKey, KeyDerivationService, PassphraseMaterial, generate_salt, random_bytes};

/// AES-GCM nonce length
pub const IV_LEN: usize = 12;

const SALT_KEY: &str = "salt";
const TOKEN_KEY: &str = "token";

/// Ciphertext of one credential plus what is needed to open it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedTokenBlob {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Id of the salt the key was derived with
    pub salt_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SaltRecord {
    id: String,
    #[serde(with = "base64_bytes")]
    salt: Vec<u8>,
    created_at: DateTime<Utc>,
}

/// Key kept for the session so repeated operations skip the slow derivation
struct SessionKey {
    salt_id: String,
    material: [u8; 32],
    key: DerivedKey,
}

/// Whether a credential is stored, without decrypting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultStatus {
    pub has_salt: bool,
    pub has_credential: bool,
    pub salt_created_at: Option<DateTime<Utc>>,
}

pub struct TokenVault<F: FingerprintSource> {
    store: Arc<KvStore>,
    fingerprint: F,
    identity: String,
    kdf: KeyDerivationService,
    session: Mutex<Option<SessionKey>>,
    // Serializes salt creation so two first-time encryptions agree on one salt
    salt_lock: tokio::sync::Mutex<()>,
}

impl<F: FingerprintSource> TokenVault<F> {
    pub fn new(store: Arc<KvStore>, fingerprint: F, identity: &str) -> Self {
        Self {
            store,
            fingerprint,
            identity: identity.to_string(),
            kdf: KeyDerivationService::new(),
            session: Mutex::new(None),
            salt_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[cfg(test)]
    fn with_kdf(mut self, kdf: KeyDerivationService) -> Self {
        self.kdf = kdf;
        self
    }

    fn load_salt(&self) -> Result<Option<SaltRecord>, VaultError> {
        Ok(self.store.get(AUTH_TOKENS, SALT_KEY)?)
    }

    async fn salt_or_create(&self) -> Result<SaltRecord, VaultError> {
        let _guard = self.salt_lock.lock().await;

        if let Some(salt) = self.load_salt()? {
            return Ok(salt);
        }

        let record = SaltRecord {
            id: uuid::Uuid::now_v7().to_string(),
            salt: generate_salt()?.to_vec(),
            created_at: Utc::now(),
        };
        self.store.put(AUTH_TOKENS, SALT_KEY, &record)?;
        log::info!("Created vault salt {}", record.id);
        Ok(record)
    }

    async fn key_for(&self, salt: &SaltRecord) -> Result<DerivedKey, VaultError> {
        let fingerprint = self.fingerprint.fingerprint().await?;
        let material = PassphraseMaterial::new(&self.identity, &fingerprint);
        let digest = material.digest();

        if let Some(key) = self.session_key(&salt.id, &digest) {
            return Ok(key);
        }

        let kdf = self.kdf;
        let salt_bytes = salt.salt.clone();
        let key = tokio::task::spawn_blocking(move || kdf.derive(&material, &salt_bytes))
            .await
            .map_err(|e| VaultError::CryptoUnavailable(format!("derivation aborted: {}", e)))??;

        if let Ok(mut session) = self.session.lock() {
            *session = Some(SessionKey {
                salt_id: salt.id.clone(),
                material: digest,
                key: key.clone(),
            });
        }

        Ok(key)
    }

    fn cipher(key: &DerivedKey) -> Result<Aes256Gcm, VaultError> {
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::CryptoUnavailable(format!("cipher init failed: {}", e)))
    }

    /// Encrypt a credential with a fresh IV. Creates the salt on first use.
    pub async fn encrypt_token(&self, token: &str) -> Result<EncryptedTokenBlob, VaultError> {
        let salt = self.salt_or_create().await?;
        let key = self.key_for(&salt).await?;
        let iv = random_bytes::<IV_LEN>()?;

        let ciphertext = Self::cipher(&key)?
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: token.as_bytes(),
                    aad: salt.id.as_bytes(),
                },
            )
            .map_err(|_| VaultError::CryptoUnavailable("encryption failed".to_string()))?;

        Ok(EncryptedTokenBlob {
            ciphertext,
            iv: iv.to_vec(),
            salt_id: salt.id,
            created_at: Utc::now(),
        })
    }

    /// Decrypt a credential.
    ///
    /// Any mismatch (tampering, truncation, rotated salt, other device) is
    /// [`VaultError::DecryptionFailed`]: the credential is invalid and the
    /// user has to sign in again.
    pub async fn decrypt_token(&self, blob: &EncryptedTokenBlob) -> Result<String, VaultError> {
        if blob.iv.len() != IV_LEN {
            return Err(VaultError::DecryptionFailed);
        }

        let salt = match self.load_salt()? {
            Some(salt) if salt.id == blob.salt_id => salt,
            _ => return Err(VaultError::DecryptionFailed),
        };

        let key = self.key_for(&salt).await?;
        let plaintext = Self::cipher(&key)?
            .decrypt(
                Nonce::from_slice(&blob.iv),
                Payload {
                    msg: &blob.ciphertext,
                    aad: salt.id.as_bytes(),
                },
            )
            .map_err(|_| VaultError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptionFailed)
    }

    /// Encrypt and persist a credential, replacing any previous one
    pub async fn store_token(&self, token: &str) -> Result<EncryptedTokenBlob, VaultError> {
        let blob = self.encrypt_token(token).await?;
        self.store.put(AUTH_TOKENS, TOKEN_KEY, &blob)?;
        Ok(blob)
    }

    /// Decrypt the persisted credential
    pub async fn load_token(&self) -> Result<String, VaultError> {
        let blob: EncryptedTokenBlob = self
            .store
            .get(AUTH_TOKENS, TOKEN_KEY)?
            .ok_or(VaultError::NoCredential)?;
        self.decrypt_token(&blob).await
    }

    /// Expiry check on the unverified `exp` claim; malformed tokens count as expired
    pub fn is_token_expired(token: &str) -> bool {
        jwt::is_expired(token, Utc::now())
    }

    /// Discard the salt (and the credential it protects). The next
    /// encryption derives a new key; earlier blobs can never be opened again.
    pub fn rotate_key(&self) -> Result<(), VaultError> {
        self.store.delete(AUTH_TOKENS, SALT_KEY)?;
        self.store.delete(AUTH_TOKENS, TOKEN_KEY)?;
        self.forget_session_key();
        log::info!("Vault key rotated");
        Ok(())
    }

    /// Sign-out housekeeping: clear the whole `auth-tokens` collection
    pub fn logout(&self) -> Result<usize, VaultError> {
        let removed = self.store.clear_collection(AUTH_TOKENS)?;
        self.forget_session_key();
        Ok(removed)
    }

    pub fn status(&self) -> Result<VaultStatus, VaultError> {
        let salt = self.load_salt()?;
        let has_credential = self
            .store
            .get::<EncryptedTokenBlob>(AUTH_TOKENS, TOKEN_KEY)?
            .is_some();

        Ok(VaultStatus {
            has_salt: salt.is_some(),
            has_credential,
            salt_created_at: salt.map(|s| s.created_at),
        })
    }

    fn session_key(&self, salt_id: &str, digest: &[u8; 32]) -> Option<DerivedKey> {
        let session = self.session.lock().ok()?;
        session
            .as_ref()
            .filter(|cached| cached.salt_id == salt_id && &cached.material == digest)
            .map(|cached| cached.key.clone())
    }

    fn forget_session_key(&self) {
        if let Ok(mut session) = self.session.lock() {
            *session = None;
        }
    }
}

/// Replayed writes carry the stored bearer token while it is still valid
#[async_trait]
impl<F: FingerprintSource> CredentialSource for TokenVault<F> {
    async fn authorization(&self) -> Option<String> {
        match self.load_token().await {
            Ok(token) if !Self::is_token_expired(&token) => Some(format!("Bearer {}", token)),
            Ok(_) => {
                log::warn!("Stored credential has expired; run 'portal-offline auth store'");
                None
            }
            Err(VaultError::NoCredential) => None,
            Err(e) => {
                log::warn!("Could not read stored credential: {}", e);
                None
            }
        }
    }
}
