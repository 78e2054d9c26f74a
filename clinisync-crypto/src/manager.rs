//! Per-tenant encryption key lifecycle.
//!
//! Exactly one active key per tenant. Rotation stores the new key material
//! and metadata first, then flips the tenant ring's active pointer in a
//! single write — a reader never observes a half-rotated state. Deactivated
//! keys are retained (bounded history) so older payloads stay decryptable,
//! and are deleted only on explicit key-wipe or when the history bound is
//! exceeded.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, KdfParams, Salt, KEY_SIZE};
use crate::secret_store::SecretStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default key rotation interval.
pub const DEFAULT_ROTATION_DAYS: i64 = 90;
/// Default number of keys retained per tenant (active + inactive).
pub const DEFAULT_KEY_HISTORY: usize = 5;

/// How a key's material was derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DerivationMethod {
    Pbkdf2Sha256,
    /// Deprecated per-device scheme. Read-only: kept so old payloads can be
    /// decrypted, never used for new writes.
    LegacyDevice,
}

/// Key metadata, persisted separately from the raw material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptionKeyMeta {
    pub key_id: String,
    pub tenant_id: String,
    pub derivation_method: DerivationMethod,
    pub salt: Salt,
    pub kdf_iterations: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl EncryptionKeyMeta {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A key with its material attached. `Debug` redacts the material.
pub struct TenantKey {
    pub meta: EncryptionKeyMeta,
    pub material: DerivedKey,
}

impl std::fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantKey")
            .field("meta", &self.meta)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// Metadata-only export of a tenant's key history. Never carries raw bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyMetadataExport {
    pub tenant_id: String,
    pub active_key_id: Option<String>,
    pub keys: Vec<EncryptionKeyMeta>,
}

/// Per-tenant key index: newest-first key ids plus the active pointer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct KeyRing {
    active_key_id: Option<String>,
    key_ids: Vec<String>,
}

/// Derives, stores, rotates, and validates per-tenant symmetric keys.
pub struct KeyManager {
    store: Arc<dyn SecretStore>,
    kdf: KdfParams,
    rotation_interval: Duration,
    max_keys_per_tenant: usize,
}

impl KeyManager {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            kdf: KdfParams::default(),
            rotation_interval: Duration::days(DEFAULT_ROTATION_DAYS),
            max_keys_per_tenant: DEFAULT_KEY_HISTORY,
        }
    }

    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    pub fn with_max_keys(mut self, max: usize) -> Self {
        self.max_keys_per_tenant = max.max(1);
        self
    }

    /// Returns the active key id, deriving and storing a new key if the
    /// tenant has none or the active key expired.
    ///
    /// Idempotent while an active, non-expired key exists and
    /// `force_rotation` is false.
    pub fn derive_and_store_key(
        &self,
        tenant_id: &str,
        force_rotation: bool,
    ) -> CryptoResult<String> {
        let mut ring = self.load_ring(tenant_id)?;

        if !force_rotation {
            if let Some(active_id) = &ring.active_key_id {
                if let Some(meta) = self.load_meta(active_id)? {
                    if !meta.is_expired(Utc::now()) {
                        return Ok(active_id.clone());
                    }
                    debug!("active key {active_id} for {tenant_id} expired, rotating");
                }
            }
        }

        let now = Utc::now();
        let salt = Salt::random();
        let material = derive_key(tenant_id, &salt, &self.kdf);
        let key_id = Uuid::new_v4().to_string();

        let meta = EncryptionKeyMeta {
            key_id: key_id.clone(),
            tenant_id: tenant_id.to_string(),
            derivation_method: DerivationMethod::Pbkdf2Sha256,
            salt,
            kdf_iterations: self.kdf.iterations,
            created_at: now,
            expires_at: now + self.rotation_interval,
            is_active: true,
        };

        // New material and metadata land before the active pointer moves.
        self.store
            .write(&material_path(&key_id), material.as_bytes())?;
        self.write_meta(&meta)?;

        if let Some(prev_id) = ring.active_key_id.clone() {
            if let Some(mut prev) = self.load_meta(&prev_id)? {
                prev.is_active = false;
                self.write_meta(&prev)?;
            }
        }

        ring.key_ids.insert(0, key_id.clone());
        ring.active_key_id = Some(key_id.clone());
        self.write_ring(tenant_id, &ring)?;

        info!("stored new key {key_id} for tenant {tenant_id}");
        Ok(key_id)
    }

    /// Forced rotation, enforcing the key-history retention bound afterward.
    pub fn rotate_key(&self, tenant_id: &str) -> CryptoResult<String> {
        let key_id = self.derive_and_store_key(tenant_id, true)?;
        self.prune_key_history(tenant_id)?;
        Ok(key_id)
    }

    /// Deletes the oldest inactive keys until the history bound holds.
    fn prune_key_history(&self, tenant_id: &str) -> CryptoResult<()> {
        let mut ring = self.load_ring(tenant_id)?;
        while ring.key_ids.len() > self.max_keys_per_tenant {
            // Newest-first ordering: prune from the back, never the active key
            let Some(pos) = ring
                .key_ids
                .iter()
                .rposition(|id| Some(id) != ring.active_key_id.as_ref())
            else {
                break;
            };
            let removed = ring.key_ids.remove(pos);
            self.store.delete(&material_path(&removed))?;
            self.store.delete(&meta_path(&removed))?;
            debug!("pruned key {removed} for {tenant_id} beyond the retention bound");
        }
        self.write_ring(tenant_id, &ring)
    }

    /// Looks up a key by id, material included.
    pub fn get_key(&self, key_id: &str) -> CryptoResult<Option<TenantKey>> {
        let Some(meta) = self.load_meta(key_id)? else {
            return Ok(None);
        };
        let Some(material) = self.load_material(key_id)? else {
            return Ok(None);
        };
        Ok(Some(TenantKey { meta, material }))
    }

    /// The tenant's current active key, if any.
    pub fn get_active_key(&self, tenant_id: &str) -> CryptoResult<Option<TenantKey>> {
        let ring = self.load_ring(tenant_id)?;
        match ring.active_key_id {
            Some(id) => self.get_key(&id),
            None => Ok(None),
        }
    }

    /// All key metadata for a tenant, ordered by creation time descending.
    pub fn list_keys(&self, tenant_id: &str) -> CryptoResult<Vec<EncryptionKeyMeta>> {
        let ring = self.load_ring(tenant_id)?;
        let mut keys = Vec::with_capacity(ring.key_ids.len());
        for id in &ring.key_ids {
            if let Some(meta) = self.load_meta(id)? {
                keys.push(meta);
            }
        }
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    /// The ordered decryption-fallback list: active key first, then retained
    /// inactive keys newest-first.
    pub fn candidate_keys(&self, tenant_id: &str) -> CryptoResult<Vec<TenantKey>> {
        let metas = self.list_keys(tenant_id)?;
        let mut candidates = Vec::with_capacity(metas.len());
        let mut inactive = Vec::new();
        for meta in metas {
            match self.load_material(&meta.key_id)? {
                Some(material) => {
                    let key = TenantKey { meta, material };
                    if key.meta.is_active {
                        candidates.push(key);
                    } else {
                        inactive.push(key);
                    }
                }
                None => warn!("key {} has metadata but no material, skipping", meta.key_id),
            }
        }
        candidates.extend(inactive);
        Ok(candidates)
    }

    /// True if the tenant has no active key or its active key has expired.
    pub fn needs_key_rotation(&self, tenant_id: &str) -> CryptoResult<bool> {
        match self.get_active_key(tenant_id)? {
            Some(key) => Ok(key.meta.is_expired(Utc::now())),
            None => Ok(true),
        }
    }

    /// True iff both the key material and parseable metadata exist.
    pub fn validate_key(&self, key_id: &str) -> CryptoResult<bool> {
        let meta_ok = match self.store.read(&meta_path(key_id))? {
            Some(bytes) => serde_json::from_slice::<EncryptionKeyMeta>(&bytes).is_ok(),
            None => false,
        };
        let material_ok = self
            .store
            .read(&material_path(key_id))?
            .is_some_and(|bytes| bytes.len() == KEY_SIZE);
        Ok(meta_ok && material_ok)
    }

    /// Wipes every key for the tenant. Returns the number of keys removed.
    pub fn delete_all_keys(&self, tenant_id: &str) -> CryptoResult<usize> {
        let ring = self.load_ring(tenant_id)?;
        let count = ring.key_ids.len();
        for id in &ring.key_ids {
            self.store.delete(&material_path(id))?;
            self.store.delete(&meta_path(id))?;
        }
        self.store.delete(&ring_path(tenant_id))?;
        info!("deleted all {count} key(s) for tenant {tenant_id}");
        Ok(count)
    }

    /// Metadata-only export for diagnostics. Never includes raw key bytes.
    pub fn export_key_metadata(&self, tenant_id: &str) -> CryptoResult<KeyMetadataExport> {
        let ring = self.load_ring(tenant_id)?;
        Ok(KeyMetadataExport {
            tenant_id: tenant_id.to_string(),
            active_key_id: ring.active_key_id,
            keys: self.list_keys(tenant_id)?,
        })
    }

    fn load_ring(&self, tenant_id: &str) -> CryptoResult<KeyRing> {
        match self.store.read(&ring_path(tenant_id))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(KeyRing::default()),
        }
    }

    fn write_ring(&self, tenant_id: &str, ring: &KeyRing) -> CryptoResult<()> {
        let bytes = serde_json::to_vec(ring)?;
        self.store.write(&ring_path(tenant_id), &bytes)
    }

    fn load_meta(&self, key_id: &str) -> CryptoResult<Option<EncryptionKeyMeta>> {
        match self.store.read(&meta_path(key_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_meta(&self, meta: &EncryptionKeyMeta) -> CryptoResult<()> {
        let bytes = serde_json::to_vec(meta)?;
        self.store.write(&meta_path(&meta.key_id), &bytes)
    }

    fn load_material(&self, key_id: &str) -> CryptoResult<Option<DerivedKey>> {
        match self.store.read(&material_path(key_id))? {
            Some(bytes) => DerivedKey::from_slice(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

fn ring_path(tenant_id: &str) -> String {
    format!("keys/ring/{tenant_id}")
}

fn meta_path(key_id: &str) -> String {
    format!("keys/meta/{key_id}")
}

fn material_path(key_id: &str) -> String {
    format!("keys/material/{key_id}")
}
