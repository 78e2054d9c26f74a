//! Remote blob transport contract.
//!
//! The engine only ever talks to the remote store through this trait, so the
//! concrete transport (S3, WebDAV, a test double) stays swappable. Failures
//! must surface as the error kinds in [`crate::error`] — the resilience
//! layer keys its retry decisions off them.

use crate::error::{StorageError, SyncResult};
use crate::naming::parse_backup_blob_name;
use async_trait::async_trait;
use chrono::Utc;
use clinisync_types::{BackupDescriptor, BackupKind};
use std::collections::HashMap;
use std::sync::Mutex;

/// Upload/download/list/delete contract for the remote blob store.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Uploads a blob, returning its remote id.
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> SyncResult<String>;

    async fn download(&self, id: &str) -> SyncResult<Vec<u8>>;

    async fn list(&self) -> SyncResult<Vec<BackupDescriptor>>;

    async fn delete(&self, id: &str) -> SyncResult<()>;

    /// The most recently created blob, if any.
    async fn latest(&self) -> SyncResult<Option<BackupDescriptor>> {
        let mut descriptors = self.list().await?;
        descriptors.sort_by_key(|d| d.created_at);
        Ok(descriptors.pop())
    }
}

/// In-memory transport for tests and fully-offline operation.
#[derive(Default)]
pub struct MemoryBlobTransport {
    blobs: Mutex<HashMap<String, (BackupDescriptor, Vec<u8>)>>,
}

impl MemoryBlobTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobTransport for MemoryBlobTransport {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> SyncResult<String> {
        let (tenant_id, created_at) = match parse_backup_blob_name(name) {
            Some((tenant, ts)) => (tenant, ts),
            None => (String::new(), Utc::now()),
        };
        let descriptor = BackupDescriptor {
            id: name.to_string(),
            name: name.to_string(),
            created_at,
            size: bytes.len() as u64,
            tenant_id,
            origin_id: None,
            kind: BackupKind::Manual,
        };
        self.blobs
            .lock()
            .unwrap()
            .insert(name.to_string(), (descriptor, bytes));
        Ok(name.to_string())
    }

    async fn download(&self, id: &str) -> SyncResult<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()).into())
    }

    async fn list(&self) -> SyncResult<Vec<BackupDescriptor>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        match self.blobs.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(id.to_string()).into()),
        }
    }
}
