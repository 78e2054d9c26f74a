//! Backup blob naming.
//!
//! Blobs are named `{tenant}_{ISO8601-timestamp}.enc` with colons replaced
//! by dashes so the names stay filesystem-safe on every transport.

use chrono::{DateTime, NaiveDateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";
const BLOB_SUFFIX: &str = ".enc";

/// Deterministic, collision-resistant blob name for a tenant backup.
pub fn backup_blob_name(tenant_id: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "{tenant_id}_{}{BLOB_SUFFIX}",
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Recovers `(tenant_id, timestamp)` from a backup blob name.
///
/// Tenant ids may themselves contain underscores — the split is on the last
/// one, ahead of the timestamp.
pub fn parse_backup_blob_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name.strip_suffix(BLOB_SUFFIX)?;
    let (tenant_id, stamp) = stem.rsplit_once('_')?;
    if tenant_id.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((tenant_id.to_string(), naive.and_utc()))
}
