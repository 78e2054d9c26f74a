//! Opaque secret storage contract.
//!
//! Key material and key metadata are persisted through this narrow interface
//! so the core stays independent of the platform keystore (OS keychain,
//! encrypted file, hardware-backed store). Keys are flat strings; values are
//! opaque bytes.

use crate::error::{CryptoError, CryptoResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Narrow persistence contract for key material and metadata.
pub trait SecretStore: Send + Sync {
    fn read(&self, key: &str) -> CryptoResult<Option<Vec<u8>>>;
    fn write(&self, key: &str, value: &[u8]) -> CryptoResult<()>;
    fn delete(&self, key: &str) -> CryptoResult<()>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn read(&self, key: &str) -> CryptoResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| CryptoError::SecretStore(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> CryptoResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CryptoError::SecretStore(e.to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> CryptoResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CryptoError::SecretStore(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// File-backed store: one file per secret under a root directory.
///
/// Path separators in keys are flattened so a key like `keys/meta/abc` maps
/// to a single file name inside the root.
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> CryptoResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| CryptoError::SecretStore(format!("create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.replace(['/', '\\'], "__"))
    }
}

impl SecretStore for FileSecretStore {
    fn read(&self, key: &str) -> CryptoResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CryptoError::SecretStore(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> CryptoResult<()> {
        let path = self.path_for(key);
        std::fs::write(&path, value)
            .map_err(|e| CryptoError::SecretStore(format!("write {}: {e}", path.display())))
    }

    fn delete(&self, key: &str) -> CryptoResult<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CryptoError::SecretStore(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }
}
