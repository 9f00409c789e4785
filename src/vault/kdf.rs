//! Key derivation from identity + device fingerprint
//!
//! PBKDF2-HMAC-SHA256 with a fixed cost. The cost does not follow any
//! backend policy; it only has to make offline guessing of the weak
//! passphrase material expensive.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::VaultError;

/// PBKDF2 iterations for production derivations
pub const KDF_ITERATIONS: u32 = 310_000;

/// Derived key length (AES-256)
pub const KEY_LEN: usize = 32;

/// Salt length
pub const SALT_LEN: usize = 16;

/// Weak identifier and device fingerprint, joined. Wiped on drop.
pub struct PassphraseMaterial(Zeroizing<String>);

impl PassphraseMaterial {
    pub fn new(identity: &str, fingerprint: &str) -> Self {
        let joined = format!("{}|{}", identity.trim().to_lowercase(), fingerprint);
        Self(Zeroizing::new(joined))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Digest used to tell whether a cached key still matches this material
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

/// Symmetric key, wiped on drop
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Turns passphrase material and a salt into a symmetric key
#[derive(Debug, Clone, Copy)]
pub struct KeyDerivationService {
    iterations: u32,
}

impl Default for KeyDerivationService {
    fn default() -> Self {
        Self {
            iterations: KDF_ITERATIONS,
        }
    }
}

impl KeyDerivationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap derivations for unit tests only
    #[cfg(test)]
    pub fn with_iterations(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn derive(
        &self,
        material: &PassphraseMaterial,
        salt: &[u8],
    ) -> Result<DerivedKey, VaultError> {
        if salt.len() < SALT_LEN {
            return Err(VaultError::CryptoUnavailable(format!(
                "salt too short ({} bytes)",
                salt.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(material.as_bytes(), salt, self.iterations, &mut *key);
        Ok(DerivedKey(key))
    }
}

/// Fill a buffer from the OS random source
pub fn random_bytes<const N: usize>() -> Result<[u8; N], VaultError> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| VaultError::CryptoUnavailable(format!("random source failed: {}", e)))?;
    Ok(buf)
}

pub fn generate_salt() -> Result<[u8; SALT_LEN], VaultError> {
    random_bytes::<SALT_LEN>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kdf() -> KeyDerivationService {
        KeyDerivationService::with_iterations(1_000)
    }

    #[test]
    fn test_derive_is_deterministic() {
        let material = PassphraseMaterial::new("alice@example.com", "fp-1");
        let salt = [7u8; SALT_LEN];

        let a = kdf().derive(&material, &salt).unwrap();
        let b = kdf().derive(&material, &salt).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_salt_and_material_change_key() {
        let material = PassphraseMaterial::new("alice@example.com", "fp-1");
        let base = kdf().derive(&material, &[7u8; SALT_LEN]).unwrap();

        let other_salt = kdf().derive(&material, &[8u8; SALT_LEN]).unwrap();
        assert_ne!(base.as_bytes(), other_salt.as_bytes());

        let other_device = PassphraseMaterial::new("alice@example.com", "fp-2");
        let other_device = kdf().derive(&other_device, &[7u8; SALT_LEN]).unwrap();
        assert_ne!(base.as_bytes(), other_device.as_bytes());
    }

    #[test]
    fn test_identity_is_normalized() {
        let a = PassphraseMaterial::new(" Alice@Example.com", "fp");
        let b = PassphraseMaterial::new("alice@example.com", "fp");
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_short_salt_rejected() {
        let material = PassphraseMaterial::new("a", "b");
        let err = kdf().derive(&material, &[1u8; 4]).unwrap_err();
        assert!(matches!(err, VaultError::CryptoUnavailable(_)));
    }

    #[test]
    fn test_production_cost_is_fixed() {
        assert_eq!(KeyDerivationService::new().iterations, KDF_ITERATIONS);
    }

    #[test]
    fn test_generated_salts_differ() {
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = kdf()
            .derive(&PassphraseMaterial::new("a", "b"), &[0u8; SALT_LEN])
            .unwrap();
        assert_eq!(format!("{:?}", key), "DerivedKey(..)");
    }
}
