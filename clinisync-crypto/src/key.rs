//! Key derivation and key material types.

use crate::error::{CryptoError, CryptoResult};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
/// PBKDF2 salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Tunable PBKDF2 parameters.
///
/// The iteration count is persisted with each key's metadata so that keys
/// derived under an older default remain recoverable after the default moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: 150_000,
        }
    }
}

impl KdfParams {
    /// Low-cost profile for tests.
    pub fn fast() -> Self {
        Self { iterations: 1_000 }
    }
}

/// A random PBKDF2 salt.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Salt({})", hex::encode(self.0))
    }
}

/// 256-bit symmetric key material, zeroized on drop and never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derives a key from a tenant secret and salt via PBKDF2-SHA256.
///
/// Deterministic for fixed `(secret, salt, params)` — re-deriving with a
/// stored salt recovers the identical key.
pub fn derive_key(secret: &str, salt: &Salt, params: &KdfParams) -> DerivedKey {
    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), params.iterations, &mut out);
    DerivedKey(out)
}

/// Generates a random key. Test and bootstrap use only — tenant keys go
/// through [`derive_key`] so they can be re-derived for recovery.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut bytes);
    DerivedKey(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = Salt::random();
        let a = derive_key("clinic-1", &salt, &KdfParams::fast());
        let b = derive_key("clinic-1", &salt, &KdfParams::fast());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salts_give_different_keys() {
        let a = derive_key("clinic-1", &Salt::random(), &KdfParams::fast());
        let b = derive_key("clinic-1", &Salt::random(), &KdfParams::fast());
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn debug_output_redacts_material() {
        let key = generate_random_key();
        assert_eq!(format!("{key:?}"), "DerivedKey([REDACTED])");
    }
}
