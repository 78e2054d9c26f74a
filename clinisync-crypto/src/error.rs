//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in key management and the encryption codec.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// AEAD verification failed. Deliberately uniform: a wrong key and a
    /// tampered ciphertext are indistinguishable.
    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,

    #[error("unsupported payload algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("plaintext checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("no active key for tenant {0}")]
    NoActiveKey(String),

    #[error("secret storage error: {0}")]
    SecretStore(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid encoding: {0}")]
    Encoding(String),
}
