//! Schema-less table records.
//!
//! Records are typed as `{id, fields}` where `fields` is an ordered map of
//! field name to JSON value. This preserves the flexibility of the dynamic
//! per-clinic schemas while keeping the sync bookkeeping fields
//! (`sync_status`, `origin_id`, timestamps) addressable by name.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Epoch-millis timestamp of the last local modification.
pub const FIELD_LAST_MODIFIED: &str = "last_modified";
/// Sync state of the record: [`STATUS_PENDING`] or [`STATUS_SYNCED`].
pub const FIELD_SYNC_STATUS: &str = "sync_status";
/// Device/process that produced the last modification.
pub const FIELD_ORIGIN_ID: &str = "origin_id";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";

/// Bookkeeping fields that are never merged field-by-field — a resolved
/// record always gets fresh values for these.
pub const SYNC_BOOKKEEPING_FIELDS: [&str; 4] = [
    FIELD_SYNC_STATUS,
    FIELD_ORIGIN_ID,
    FIELD_CREATED_AT,
    FIELD_UPDATED_AT,
];

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SYNCED: &str = "synced";

/// A single row of a sync-enabled table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Returns the value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field, returning `self` for chained construction.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// The record's last-modified instant in epoch millis, if the field is
    /// present and parseable.
    pub fn last_modified(&self) -> Option<i64> {
        self.fields.get(FIELD_LAST_MODIFIED).and_then(parse_timestamp_millis)
    }

    pub fn sync_status(&self) -> Option<&str> {
        self.fields.get(FIELD_SYNC_STATUS).and_then(Value::as_str)
    }

    /// True when the record carries local modifications that have not been
    /// acknowledged by the remote side.
    pub fn has_pending_changes(&self) -> bool {
        self.sync_status() == Some(STATUS_PENDING)
    }

    /// Stamps the record as a fresh local modification.
    pub fn mark_pending(&mut self, now_millis: i64) {
        self.fields
            .insert(FIELD_LAST_MODIFIED.to_string(), Value::from(now_millis));
        self.fields
            .insert(FIELD_SYNC_STATUS.to_string(), Value::from(STATUS_PENDING));
    }

    pub fn mark_synced(&mut self) {
        self.fields
            .insert(FIELD_SYNC_STATUS.to_string(), Value::from(STATUS_SYNCED));
    }

    /// True when the payload fields (everything except bookkeeping) differ.
    pub fn differs_from(&self, other: &Record) -> bool {
        let payload = |r: &Record| -> Map<String, Value> {
            r.fields
                .iter()
                .filter(|(k, _)| {
                    !SYNC_BOOKKEEPING_FIELDS.contains(&k.as_str())
                        && k.as_str() != FIELD_LAST_MODIFIED
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        payload(self) != payload(other)
    }
}

/// Parses a timestamp value as epoch millis.
///
/// Accepts an integer (already epoch millis) or an ISO-8601 / RFC 3339
/// string. Returns `None` for anything else.
pub fn parse_timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .ok(),
        _ => None,
    }
}
