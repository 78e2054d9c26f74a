//! Offline-first encrypted sync engine for clinisync.
//!
//! Provides blob-store-backed encrypted sync with:
//! - Full and incremental sync with per-record conflict resolution
//! - Timestamp-based (last-write-wins) and field-level merge strategies
//! - Encrypted backup and restore with integrity validation
//! - Retry/circuit-breaker resilience around every remote call
//! - Calendar-bucketed backup retention pruning

pub mod config;
pub mod conflict;
pub mod control;
pub mod engine;
pub mod error;
pub mod naming;
pub mod retention;
pub mod s3;
pub mod store;
pub mod transport;

pub use config::{ConflictPolicy, EngineConfig};
pub use conflict::{
    last_write_wins, merge_records, ConflictKind, ConflictResolution, ResolutionStrategy,
    SyncConflict,
};
pub use control::{CancelToken, ProgressFn, ProgressReporter};
pub use engine::{EngineState, OutcomeStatus, ReconcileAction, SyncEngine, SyncOutcome};
pub use error::{
    AuthError, ConflictError, IntegrityError, NetworkError, OperationError, StorageError,
    SyncError, SyncResult,
};
pub use retention::{prune, RetentionPolicy};
pub use s3::{S3BlobTransport, S3TransportConfig};
pub use store::{MemoryRecordStore, RecordStore};
pub use transport::{BlobTransport, MemoryBlobTransport};
