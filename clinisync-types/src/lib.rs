//! Shared data model for the clinisync core.
//!
//! A tenant is a single clinic's isolated dataset. Tables hold schema-less
//! [`Record`]s; a [`SyncSnapshot`] is a point-in-time export of all
//! sync-enabled tables. Per-table sync bookkeeping lives in [`SyncMetadata`],
//! and remote blobs are identified by [`BackupDescriptor`]s.

mod metadata;
mod record;
mod snapshot;

pub use metadata::{BackupDescriptor, BackupKind, SyncMetadata};
pub use record::{
    parse_timestamp_millis, Record, FIELD_CREATED_AT, FIELD_LAST_MODIFIED, FIELD_ORIGIN_ID,
    FIELD_SYNC_STATUS, FIELD_UPDATED_AT, STATUS_PENDING, STATUS_SYNCED, SYNC_BOOKKEEPING_FIELDS,
};
pub use snapshot::{SyncSnapshot, SNAPSHOT_VERSION};
