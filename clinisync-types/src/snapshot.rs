//! Point-in-time snapshot of all sync-enabled tables.

use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Current snapshot wire format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A full export of the tenant's sync-enabled tables.
///
/// Immutable once built: the checksum is computed over the canonical
/// serialization of every field except the checksum itself, and
/// [`validate_integrity`](SyncSnapshot::validate_integrity) recomputes and
/// compares it. Tables use a `BTreeMap` so serialization order is canonical.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub tenant_id: String,
    pub origin_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub tables: BTreeMap<String, Vec<Record>>,
    pub checksum: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SyncSnapshot {
    /// Builds a snapshot, computing its integrity checksum.
    pub fn new(
        tenant_id: impl Into<String>,
        origin_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        tables: BTreeMap<String, Vec<Record>>,
        metadata: Map<String, Value>,
    ) -> serde_json::Result<Self> {
        let mut snapshot = Self {
            tenant_id: tenant_id.into(),
            origin_id: origin_id.into(),
            timestamp,
            version: SNAPSHOT_VERSION,
            tables,
            checksum: String::new(),
            metadata,
        };
        snapshot.checksum = snapshot.compute_checksum()?;
        Ok(snapshot)
    }

    /// SHA-256 hex digest over the canonical serialization with the checksum
    /// field blanked.
    fn compute_checksum(&self) -> serde_json::Result<String> {
        let mut unsealed = self.clone();
        unsealed.checksum = String::new();
        let bytes = serde_json::to_vec(&unsealed)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// True when the stored checksum matches the recomputed one.
    pub fn validate_integrity(&self) -> bool {
        self.compute_checksum()
            .map(|computed| computed == self.checksum)
            .unwrap_or(false)
    }

    /// Total record count across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }
}
