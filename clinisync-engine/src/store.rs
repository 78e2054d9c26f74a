//! Local record store contract.
//!
//! The engine treats the local relational store as the source of truth
//! during conflict resolution and consumes it only through this narrow
//! record-access contract. Each call is its own transaction-scoped
//! operation — the engine never holds a lock across calls.

use crate::error::{StorageError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinisync_types::{Record, SyncMetadata};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Record-access contract over the local store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records whose `last_modified` is at or after `since`; `None` means
    /// everything (changed since epoch).
    async fn changed_since(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Record>>;

    async fn get_by_id(&self, table: &str, id: &str) -> SyncResult<Option<Record>>;

    async fn insert(&self, table: &str, record: Record) -> SyncResult<()>;

    /// Replaces an existing record; `StorageError::NotFound` if absent.
    async fn update(&self, table: &str, id: &str, record: Record) -> SyncResult<()>;

    /// Flips the given records to synced after an upload acknowledgment.
    async fn mark_synced(&self, table: &str, ids: &[String]) -> SyncResult<()>;

    async fn get_sync_metadata(&self, table: &str) -> SyncResult<Option<SyncMetadata>>;

    async fn set_sync_metadata(&self, table: &str, metadata: SyncMetadata) -> SyncResult<()>;
}

#[derive(Default)]
struct MemoryStoreInner {
    tables: HashMap<String, BTreeMap<String, Record>>,
    metadata: HashMap<String, SyncMetadata>,
}

/// In-memory record store for tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records in a table, for assertions.
    pub fn table_len(&self, table: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn changed_since(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Record>> {
        let inner = self.inner.lock().unwrap();
        let Some(rows) = inner.tables.get(table) else {
            return Ok(Vec::new());
        };
        let since_millis = since.map(|ts| ts.timestamp_millis());
        Ok(rows
            .values()
            .filter(|record| match since_millis {
                None => true,
                Some(cutoff) => record.last_modified().is_some_and(|ts| ts >= cutoff),
            })
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, table: &str, id: &str) -> SyncResult<Option<Record>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tables.get(table).and_then(|rows| rows.get(id)).cloned())
    }

    async fn insert(&self, table: &str, record: Record) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, record: Record) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::NotFound(format!("{table}/{id}")))?;
        if !rows.contains_key(id) {
            return Err(StorageError::NotFound(format!("{table}/{id}")).into());
        }
        rows.insert(id.to_string(), record);
        Ok(())
    }

    async fn mark_synced(&self, table: &str, ids: &[String]) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rows) = inner.tables.get_mut(table) {
            for id in ids {
                if let Some(record) = rows.get_mut(id) {
                    record.mark_synced();
                }
            }
        }
        Ok(())
    }

    async fn get_sync_metadata(&self, table: &str) -> SyncResult<Option<SyncMetadata>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.metadata.get(table).cloned())
    }

    async fn set_sync_metadata(&self, table: &str, metadata: SyncMetadata) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.metadata.insert(table.to_string(), metadata);
        Ok(())
    }
}
