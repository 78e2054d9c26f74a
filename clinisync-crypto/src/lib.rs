//! Encryption layer for clinisync.
//!
//! Provides per-tenant encryption using:
//! - PBKDF2-SHA256 for key derivation
//! - AES-256-GCM for authenticated encryption
//! - Secure key management with zeroization
//!
//! # Architecture
//!
//! Each tenant (clinic) has exactly one *active* key at a time, derived from
//! the tenant identifier and a random salt. Rotation stores a new key and
//! flips the active pointer in one step; prior keys are kept inactive (bounded
//! history) so payloads encrypted before a rotation stay readable. Raw key
//! material lives in the opaque [`SecretStore`], always separate from the key
//! metadata, and is never exported.

mod cipher;
mod error;
mod key;
mod manager;
mod secret_store;

pub use cipher::{
    checksum, decrypt, decrypt_bytes, decrypt_string, encrypt, encrypt_bytes, encrypt_string,
    validate_integrity, EncryptedPayload, ALGORITHM_AES_256_GCM, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use manager::{
    DerivationMethod, EncryptionKeyMeta, KeyManager, KeyMetadataExport, TenantKey,
    DEFAULT_KEY_HISTORY, DEFAULT_ROTATION_DAYS,
};
pub use secret_store::{FileSecretStore, MemorySecretStore, SecretStore};
