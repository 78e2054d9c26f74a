//! Authenticated encryption codec (AES-256-GCM).

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;
/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

pub const ALGORITHM_AES_256_GCM: &str = "aes-256-gcm";

/// An encrypted, authenticated payload.
///
/// `checksum` is a SHA-256 digest of the plaintext, independent of the AEAD
/// tag — it allows an integrity pre-check without attempting decryption, and
/// stays identical across re-encryptions of the same plaintext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
    pub auth_tag: [u8; TAG_SIZE],
    pub algorithm: String,
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
}

/// Encrypts raw bytes under the given key.
///
/// A fresh random 12-byte IV is generated per call; reusing an IV under the
/// same key would void GCM's guarantees, so the IV is never caller-supplied.
pub fn encrypt_bytes(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedPayload> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("cipher init failed: {e}")))?;

    let mut iv = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("AEAD seal failed: {e}")))?;

    // aes-gcm appends the tag; keep it as a separate field
    let tag_start = sealed.len() - TAG_SIZE;
    let tag_bytes = sealed.split_off(tag_start);
    let mut auth_tag = [0u8; TAG_SIZE];
    auth_tag.copy_from_slice(&tag_bytes);

    Ok(EncryptedPayload {
        ciphertext: sealed,
        iv,
        auth_tag,
        algorithm: ALGORITHM_AES_256_GCM.to_string(),
        checksum: checksum(plaintext),
        timestamp: Utc::now(),
    })
}

/// Decrypts a payload, verifying the authentication tag.
pub fn decrypt_bytes(key: &DerivedKey, payload: &EncryptedPayload) -> CryptoResult<Vec<u8>> {
    if payload.algorithm != ALGORITHM_AES_256_GCM {
        return Err(CryptoError::UnsupportedAlgorithm(payload.algorithm.clone()));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("cipher init failed: {e}")))?;

    let mut sealed = Vec::with_capacity(payload.ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(&payload.ciphertext);
    sealed.extend_from_slice(&payload.auth_tag);

    cipher
        .decrypt(Nonce::from_slice(&payload.iv), sealed.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Encrypts any serializable value (canonical JSON bytes).
pub fn encrypt<T: Serialize>(key: &DerivedKey, value: &T) -> CryptoResult<EncryptedPayload> {
    let bytes = serde_json::to_vec(value)?;
    encrypt_bytes(key, &bytes)
}

/// Decrypts a payload back into a structured value.
pub fn decrypt<T: DeserializeOwned>(key: &DerivedKey, payload: &EncryptedPayload) -> CryptoResult<T> {
    let bytes = decrypt_bytes(key, payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encrypts a string, returning the payload base64-encoded for transport.
pub fn encrypt_string(key: &DerivedKey, plaintext: &str) -> CryptoResult<String> {
    let payload = encrypt_bytes(key, plaintext.as_bytes())?;
    let bytes = serde_json::to_vec(&payload)?;
    Ok(BASE64.encode(bytes))
}

/// Decrypts a base64-encoded payload produced by [`encrypt_string`].
pub fn decrypt_string(key: &DerivedKey, encoded: &str) -> CryptoResult<String> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::Encoding(format!("invalid base64: {e}")))?;
    let payload: EncryptedPayload = serde_json::from_slice(&bytes)?;
    let plaintext = decrypt_bytes(key, &payload)?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::Encoding(format!("invalid utf-8: {e}")))
}

/// SHA-256 hex digest of a byte slice.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Recomputes the digest and compares against the expected value.
///
/// A sanity check independent of AEAD verification, not a substitute for it.
pub fn validate_integrity(bytes: &[u8], expected_checksum: &str) -> bool {
    checksum(bytes) == expected_checksum
}
