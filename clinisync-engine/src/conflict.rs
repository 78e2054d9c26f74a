//! Conflict detection and resolution.
//!
//! A conflict exists when a remote record and the local record for the same
//! `(table, id)` both carry modifications since the last common sync point.
//! Resolution is idempotent: the merge stamps its bookkeeping from the
//! conflict's detection time, so re-resolving with the same strategy yields
//! the identical record.

use crate::error::ConflictError;
use chrono::{DateTime, Utc};
use clinisync_types::{
    parse_timestamp_millis, Record, FIELD_LAST_MODIFIED, SYNC_BOOKKEEPING_FIELDS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What kind of divergence produced the conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    /// Both sides changed the record since the last common sync point.
    BothModified,
}

/// How a conflict is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionStrategy {
    UseLocal,
    UseRemote,
    Merge,
    Manual,
}

/// A detected divergence, destroyed upon resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub table_name: String,
    pub record_id: String,
    pub local_record: Record,
    pub remote_record: Record,
    pub detected_at: DateTime<Utc>,
    pub kind: ConflictKind,
}

impl SyncConflict {
    pub fn new(
        table_name: impl Into<String>,
        local_record: Record,
        remote_record: Record,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table_name: table_name.into(),
            record_id: local_record.id.clone(),
            local_record,
            remote_record,
            detected_at,
            kind: ConflictKind::BothModified,
        }
    }
}

/// The outcome of resolving one conflict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub resolved_record: Record,
    pub resolved_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Resolves a conflict with the given strategy.
///
/// `Manual` requires a caller-supplied record for the conflicted id; the
/// engine stores it without algorithmic merging.
pub fn resolve(
    conflict: &SyncConflict,
    strategy: ResolutionStrategy,
    manual_record: Option<Record>,
) -> Result<ConflictResolution, ConflictError> {
    let resolved_record = match strategy {
        ResolutionStrategy::UseLocal => conflict.local_record.clone(),
        ResolutionStrategy::UseRemote => {
            let mut record = conflict.remote_record.clone();
            // Remote content applied verbatim is in sync with the remote
            record.mark_synced();
            record
        }
        ResolutionStrategy::Merge => {
            merge_records(&conflict.local_record, &conflict.remote_record, conflict.detected_at)
        }
        ResolutionStrategy::Manual => {
            let record = manual_record.ok_or_else(|| {
                ConflictError::InvalidResolution(
                    "manual resolution requires a caller-supplied record".to_string(),
                )
            })?;
            if record.id != conflict.record_id {
                return Err(ConflictError::InvalidResolution(format!(
                    "resolved record id {} does not match conflict record {}",
                    record.id, conflict.record_id
                )));
            }
            record
        }
    };

    Ok(ConflictResolution {
        conflict_id: conflict.id.clone(),
        strategy,
        resolved_record,
        resolved_at: Utc::now(),
        notes: None,
    })
}

/// Default automatic strategy: last-write-wins on `last_modified`.
///
/// Remote wins only when strictly more recent — a tie keeps the local record
/// so nothing is overwritten without cause.
pub fn last_write_wins(conflict: &SyncConflict) -> ResolutionStrategy {
    let local = conflict.local_record.last_modified();
    let remote = conflict.remote_record.last_modified();
    match (local, remote) {
        (Some(l), Some(r)) if r > l => ResolutionStrategy::UseRemote,
        (None, Some(_)) => ResolutionStrategy::UseRemote,
        _ => ResolutionStrategy::UseLocal,
    }
}

/// Field-level merge, conservative by default.
///
/// Starting from the local record: a remote value is adopted when the local
/// one is null/empty, when a timestamp-like field is strictly later on the
/// remote side, or when a numeric field is larger on the remote side.
/// Everything else keeps local. Bookkeeping fields are never merged; the
/// result gets fresh bookkeeping stamped from `detected_at` and goes back to
/// pending so it uploads on the next pass.
pub fn merge_records(local: &Record, remote: &Record, detected_at: DateTime<Utc>) -> Record {
    let mut merged = local.clone();

    for (field, remote_value) in &remote.fields {
        if SYNC_BOOKKEEPING_FIELDS.contains(&field.as_str()) || field == FIELD_LAST_MODIFIED {
            continue;
        }

        let adopt_remote = match merged.get(field) {
            None => true,
            Some(local_value) if is_empty_value(local_value) => true,
            Some(local_value) => {
                if is_timestamp_field(field) {
                    match (
                        parse_timestamp_millis(local_value),
                        parse_timestamp_millis(remote_value),
                    ) {
                        (Some(l), Some(r)) => r > l,
                        // Unparseable on either side: keep local
                        _ => false,
                    }
                } else if let (Some(l), Some(r)) = (local_value.as_f64(), remote_value.as_f64()) {
                    r > l
                } else {
                    false
                }
            }
        };

        if adopt_remote {
            merged.set(field.clone(), remote_value.clone());
        }
    }

    for field in SYNC_BOOKKEEPING_FIELDS {
        merged.fields.remove(field);
    }
    merged.mark_pending(detected_at.timestamp_millis());
    merged
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn is_timestamp_field(field: &str) -> bool {
    field == "timestamp"
        || field.ends_with("_at")
        || field.ends_with("_date")
        || field.ends_with("_time")
}
