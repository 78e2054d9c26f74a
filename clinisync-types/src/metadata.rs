//! Per-table sync bookkeeping and remote blob descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync bookkeeping for one table, mutated after every successful sync or
/// backup pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub table_name: String,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub last_backup_timestamp: Option<DateTime<Utc>>,
    pub pending_change_count: u64,
    pub last_origin_id: Option<String>,
}

impl SyncMetadata {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            last_sync_timestamp: None,
            last_backup_timestamp: None,
            pending_change_count: 0,
            last_origin_id: None,
        }
    }
}

/// How a remote backup blob came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Manual,
    Scheduled,
}

/// Identifies one blob in the remote store; input to the retention policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub tenant_id: String,
    pub origin_id: Option<String>,
    pub kind: BackupKind,
}
