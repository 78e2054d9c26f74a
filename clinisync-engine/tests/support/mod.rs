//! Shared test helpers: in-memory engine wiring and remote seeding.

use chrono::{DateTime, Utc};
use clinisync_crypto::{KdfParams, KeyManager, MemorySecretStore};
use clinisync_engine::naming::backup_blob_name;
use clinisync_engine::{
    BlobTransport, EngineConfig, MemoryBlobTransport, MemoryRecordStore, NetworkError, SyncEngine,
    SyncResult,
};
use clinisync_resilience::RetryPolicy;
use clinisync_types::{BackupDescriptor, Record, SyncSnapshot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const TENANT: &str = "clinic-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine config with no retry delays, for deterministic tests.
pub fn fast_config(tables: &[&str]) -> EngineConfig {
    EngineConfig::new(
        TENANT,
        "device-1",
        tables.iter().map(|t| t.to_string()).collect(),
    )
    .with_retry(RetryPolicy::new(0).without_jitter())
}

pub struct TestRig {
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryRecordStore>,
    pub transport: Arc<MemoryBlobTransport>,
    pub keys: Arc<KeyManager>,
}

pub fn test_rig(config: EngineConfig) -> TestRig {
    let store = Arc::new(MemoryRecordStore::new());
    let transport = Arc::new(MemoryBlobTransport::new());
    let keys = Arc::new(
        KeyManager::new(Arc::new(MemorySecretStore::new())).with_kdf_params(KdfParams::fast()),
    );
    let engine = Arc::new(SyncEngine::new(
        config,
        keys.clone(),
        transport.clone(),
        store.clone(),
    ));
    TestRig {
        engine,
        store,
        transport,
        keys,
    }
}

/// A patient-style record with sync bookkeeping.
pub fn patient(id: &str, name: &str, last_modified: i64, pending: bool) -> Record {
    let mut record = Record::new(id)
        .with_field("name", name)
        .with_field("last_modified", last_modified);
    if pending {
        record.set("sync_status", "pending");
    } else {
        record.set("sync_status", "synced");
    }
    record
}

/// Seals a snapshot with the tenant's active key and uploads it, bypassing
/// the engine — used to stage "some other device's" remote state.
pub async fn seed_remote_backup(
    transport: &MemoryBlobTransport,
    keys: &KeyManager,
    origin_id: &str,
    tables: BTreeMap<String, Vec<Record>>,
    at: DateTime<Utc>,
) -> String {
    keys.derive_and_store_key(TENANT, false).unwrap();
    let key = keys.get_active_key(TENANT).unwrap().unwrap();

    let snapshot = SyncSnapshot::new(TENANT, origin_id, at, tables, serde_json::Map::new()).unwrap();
    let payload = clinisync_crypto::encrypt(&key.material, &snapshot).unwrap();
    let bytes = serde_json::to_vec(&payload).unwrap();

    let name = backup_blob_name(TENANT, at);
    transport.upload(&name, bytes).await.unwrap()
}

/// Transport that fails every call with a retryable network error.
#[derive(Default)]
pub struct FailingTransport {
    pub calls: AtomicU32,
}

#[async_trait::async_trait]
impl BlobTransport for FailingTransport {
    async fn upload(&self, _name: &str, _bytes: Vec<u8>) -> SyncResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NetworkError::ConnectionRefused.into())
    }

    async fn download(&self, _id: &str) -> SyncResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NetworkError::ConnectionRefused.into())
    }

    async fn list(&self) -> SyncResult<Vec<BackupDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NetworkError::ConnectionRefused.into())
    }

    async fn delete(&self, _id: &str) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NetworkError::ConnectionRefused.into())
    }
}

/// Transport whose uploads block until released — used to hold an operation
/// in flight while another is attempted.
pub struct GatedTransport {
    inner: MemoryBlobTransport,
    gate: tokio::sync::Notify,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self {
            inner: MemoryBlobTransport::new(),
            gate: tokio::sync::Notify::new(),
        }
    }

    pub fn release(&self) {
        // notify_one stores a permit, so an early release still unblocks
        self.gate.notify_one();
    }
}

#[async_trait::async_trait]
impl BlobTransport for GatedTransport {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> SyncResult<String> {
        self.gate.notified().await;
        self.inner.upload(name, bytes).await
    }

    async fn download(&self, id: &str) -> SyncResult<Vec<u8>> {
        self.inner.download(id).await
    }

    async fn list(&self) -> SyncResult<Vec<BackupDescriptor>> {
        self.inner.list().await
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        self.inner.delete(id).await
    }
}
