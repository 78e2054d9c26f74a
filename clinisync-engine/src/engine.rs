//! Sync engine — orchestrates snapshot export/encrypt/upload and
//! download/decrypt/conflict-resolve/import.
//!
//! One operation per tenant at a time: the engine state acts as a mutual
//! exclusion flag and a second invocation is rejected, never queued. Remote
//! calls go through the resilience layer (breaker wrapping the retried
//! operation); local store calls are awaited sequentially so conflict
//! resolution always sees a consistent per-table view.

use crate::config::{ConflictPolicy, EngineConfig};
use crate::conflict::{
    self, last_write_wins, ConflictResolution, ResolutionStrategy, SyncConflict,
};
use crate::control::{CancelToken, ProgressFn, ProgressReporter};
use crate::error::{IntegrityError, OperationError, StorageError, SyncError, SyncResult};
use crate::naming::backup_blob_name;
use crate::retention;
use crate::store::RecordStore;
use crate::transport::BlobTransport;
use chrono::{DateTime, Utc};
use clinisync_crypto::{
    decrypt_bytes, validate_integrity, CryptoError, EncryptedPayload, KeyManager, TenantKey,
};
use clinisync_resilience::{CircuitBreaker, RetryPolicy};
use clinisync_types::{BackupDescriptor, Record, SyncMetadata, SyncSnapshot, SNAPSHOT_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine lifecycle: one operation in flight at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Syncing,
    BackingUp,
    Restoring,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Syncing => "sync",
            Self::BackingUp => "backup",
            Self::Restoring => "restore",
        };
        f.write_str(label)
    }
}

/// Which way a reconcile pass went.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconcileAction {
    Backup,
    Restore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    Success,
    /// Completed, but some conflicts await manual resolution.
    Partial,
}

/// Structured result of every top-level operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub status: OutcomeStatus,
    pub duration: Duration,
    pub records_pushed: usize,
    pub records_pulled: usize,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    pub unresolved_conflicts: Vec<String>,
    pub tables_processed: usize,
}

#[derive(Default)]
struct ImportStats {
    pulled: usize,
    detected: usize,
    resolved: usize,
    unresolved: Vec<String>,
}

/// Resets the engine to idle when an operation ends, successfully or not.
struct OpGuard<'a> {
    state: &'a Mutex<EngineState>,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap() = EngineState::Idle;
    }
}

/// Offline-first encrypted sync engine for one tenant.
pub struct SyncEngine {
    config: EngineConfig,
    keys: Arc<KeyManager>,
    transport: Arc<dyn BlobTransport>,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    state: Mutex<EngineState>,
    pending_conflicts: Mutex<HashMap<String, SyncConflict>>,
    progress: Option<Arc<ProgressFn>>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        keys: Arc<KeyManager>,
        transport: Arc<dyn BlobTransport>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let retry = config.retry.clone();
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Self {
            config,
            keys,
            transport,
            store,
            retry,
            breaker,
            state: Mutex::new(EngineState::Idle),
            pending_conflicts: Mutex::new(HashMap::new()),
            progress: None,
        }
    }

    /// Installs a progress callback shared by all operations.
    pub fn with_progress(mut self, callback: Arc<ProgressFn>) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    /// Conflicts parked for manual resolution.
    pub fn pending_conflicts(&self) -> Vec<SyncConflict> {
        self.pending_conflicts
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    /// Full sync: pushes everything locally pending, then imports the most
    /// recent remote snapshot through conflict resolution.
    pub async fn full_sync(&self, cancel: &CancelToken) -> SyncResult<SyncOutcome> {
        let _guard = self.begin(EngineState::Syncing)?;
        self.run_sync(None, cancel).await
    }

    /// Incremental sync scoped to changes since the oldest per-table sync
    /// point; falls back to full sync when any table has never synced.
    pub async fn sync(&self, cancel: &CancelToken) -> SyncResult<SyncOutcome> {
        let _guard = self.begin(EngineState::Syncing)?;
        match self.incremental_since().await? {
            Some(since) => {
                debug!("incremental sync since {since}");
                self.run_sync(Some(since), cancel).await
            }
            None => {
                debug!("no prior sync timestamp on some table, falling back to full sync");
                self.run_sync(None, cancel).await
            }
        }
    }

    /// Exports a full snapshot, encrypts it under the tenant's active key,
    /// uploads it, and prunes old backups per the retention policy.
    pub async fn backup(&self, cancel: &CancelToken) -> SyncResult<SyncOutcome> {
        let _guard = self.begin(EngineState::BackingUp)?;
        let started = Instant::now();
        let progress = ProgressReporter::new(self.progress.clone());

        progress.report(0.1, "exporting local tables");
        let mut tables = BTreeMap::new();
        let mut exported = 0usize;
        for table in &self.config.sync_tables {
            let records = self.store.changed_since(table, None).await?;
            exported += records.len();
            tables.insert(table.clone(), records);
        }
        cancel.check()?;

        progress.report(0.35, "encrypting snapshot");
        let key = self.ensure_active_key()?;
        let snapshot = SyncSnapshot::new(
            &self.config.tenant_id,
            &self.config.origin_id,
            Utc::now(),
            tables,
            serde_json::Map::new(),
        )?;
        let bytes = self.seal_snapshot(&snapshot, &key)?;

        progress.report(0.55, "uploading backup");
        let name = backup_blob_name(&self.config.tenant_id, snapshot.timestamp);
        self.remote_upload(&name, bytes).await?;
        info!("backup {name} uploaded ({exported} records)");

        // Best-effort: a pruning failure never fails the backup itself
        progress.report(0.8, "pruning old backups");
        if !cancel.is_cancelled() {
            match self.prune_remote(snapshot.timestamp).await {
                Ok(0) => {}
                Ok(deleted) => info!("retention pruning deleted {deleted} old backup(s)"),
                Err(e) => warn!("retention pruning failed, continuing: {e}"),
            }
        }

        progress.report(0.95, "updating backup metadata");
        self.update_metadata_after_backup(snapshot.timestamp).await?;
        progress.report(1.0, "backup complete");

        Ok(SyncOutcome {
            status: OutcomeStatus::Success,
            duration: started.elapsed(),
            records_pushed: exported,
            records_pulled: 0,
            conflicts_detected: 0,
            conflicts_resolved: 0,
            unresolved_conflicts: Vec::new(),
            tables_processed: self.config.sync_tables.len(),
        })
    }

    /// Downloads the named (or latest) backup, decrypts it against the
    /// ordered candidate key list, validates integrity, and imports it
    /// through the same conflict-resolution path as sync.
    pub async fn restore(
        &self,
        blob_name: Option<&str>,
        cancel: &CancelToken,
    ) -> SyncResult<SyncOutcome> {
        let _guard = self.begin(EngineState::Restoring)?;
        let started = Instant::now();
        let progress = ProgressReporter::new(self.progress.clone());

        progress.report(0.1, "locating remote backup");
        let descriptor = match blob_name {
            Some(name) => self
                .remote_list()
                .await?
                .into_iter()
                .find(|d| d.name == name || d.id == name)
                .ok_or_else(|| StorageError::NotFound(name.to_string()))?,
            None => self
                .remote_latest()
                .await?
                .ok_or_else(|| StorageError::NotFound("no remote backups exist".to_string()))?,
        };
        cancel.check()?;

        progress.report(0.3, "downloading backup");
        let bytes = self.remote_download(&descriptor.id).await?;

        // Any failure from here up to import leaves local data untouched
        progress.report(0.5, "decrypting and validating snapshot");
        let snapshot = self.open_snapshot(&bytes)?;

        progress.report(0.7, "importing records");
        let import = self.import_snapshot(&snapshot, cancel).await?;

        progress.report(0.95, "updating sync metadata");
        self.update_metadata_after_restore(Utc::now(), &snapshot).await?;
        progress.report(1.0, "restore complete");
        info!(
            "restored {} from {} ({} records pulled, {} conflicts)",
            descriptor.name, snapshot.origin_id, import.pulled, import.detected
        );

        Ok(SyncOutcome {
            status: if import.unresolved.is_empty() {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Partial
            },
            duration: started.elapsed(),
            records_pushed: 0,
            records_pulled: import.pulled,
            conflicts_detected: import.detected,
            conflicts_resolved: import.resolved,
            unresolved_conflicts: import.unresolved,
            tables_processed: snapshot.tables.len(),
        })
    }

    /// One-click reconcile: a pure timestamp comparison decides between
    /// restore (remote newer, or nothing saved locally yet) and backup.
    /// Nothing is written anywhere before the decision.
    pub async fn reconcile(
        &self,
        cancel: &CancelToken,
    ) -> SyncResult<(ReconcileAction, SyncOutcome)> {
        let local_last = self.local_last_save().await?;
        let remote_latest = self.remote_latest().await?;

        let action = match (&local_last, &remote_latest) {
            (_, None) => ReconcileAction::Backup,
            (None, Some(_)) => ReconcileAction::Restore,
            (Some(local), Some(remote)) if remote.created_at > *local => ReconcileAction::Restore,
            _ => ReconcileAction::Backup,
        };
        info!(
            "reconcile decision: {action:?} (local last save {local_last:?}, remote latest {:?})",
            remote_latest.as_ref().map(|d| d.created_at)
        );

        let outcome = match action {
            ReconcileAction::Restore => self.restore(None, cancel).await?,
            ReconcileAction::Backup => self.backup(cancel).await?,
        };
        Ok((action, outcome))
    }

    /// Resolves a parked conflict and clears it.
    ///
    /// `Manual` requires `manual_record`; other strategies re-run the
    /// automatic resolution for this conflict.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        manual_record: Option<Record>,
    ) -> SyncResult<ConflictResolution> {
        let conflict = self
            .pending_conflicts
            .lock()
            .unwrap()
            .get(conflict_id)
            .cloned()
            .ok_or_else(|| {
                SyncError::from(crate::error::ConflictError::InvalidResolution(format!(
                    "unknown conflict id {conflict_id}"
                )))
            })?;

        let resolution = conflict::resolve(&conflict, strategy, manual_record)?;
        self.store
            .update(
                &conflict.table_name,
                &conflict.record_id,
                resolution.resolved_record.clone(),
            )
            .await?;
        self.pending_conflicts.lock().unwrap().remove(conflict_id);
        info!(
            "conflict {conflict_id} on {}/{} resolved via {:?}",
            conflict.table_name, conflict.record_id, strategy
        );
        Ok(resolution)
    }

    // ------------------------------------------------------------------
    // Sync internals
    // ------------------------------------------------------------------

    async fn run_sync(
        &self,
        since: Option<DateTime<Utc>>,
        cancel: &CancelToken,
    ) -> SyncResult<SyncOutcome> {
        let started = Instant::now();
        let progress = ProgressReporter::new(self.progress.clone());

        progress.report(0.05, "collecting local changes");
        let mut delta_tables: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for table in &self.config.sync_tables {
            let changed = self.store.changed_since(table, since).await?;
            let pending: Vec<Record> = changed
                .into_iter()
                .filter(|record| record.has_pending_changes())
                .collect();
            if !pending.is_empty() {
                delta_tables.insert(table.clone(), pending);
            }
        }
        cancel.check()?;

        let mut pushed = 0usize;
        if !delta_tables.is_empty() {
            progress.report(0.2, "uploading local changes");
            let key = self.ensure_active_key()?;
            let mut metadata = serde_json::Map::new();
            metadata.insert("delta".to_string(), serde_json::Value::Bool(true));
            let snapshot = SyncSnapshot::new(
                &self.config.tenant_id,
                &self.config.origin_id,
                Utc::now(),
                delta_tables.clone(),
                metadata,
            )?;
            let bytes = self.seal_snapshot(&snapshot, &key)?;
            let name = backup_blob_name(&self.config.tenant_id, snapshot.timestamp);
            self.remote_upload(&name, bytes).await?;

            // Mark synced only after the upload acknowledgment
            for (table, records) in &delta_tables {
                let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
                self.store.mark_synced(table, &ids).await?;
                pushed += ids.len();
            }
            debug!("pushed {pushed} pending record(s) as {name}");
        }
        cancel.check()?;

        // The download step deliberately re-fetches the whole latest
        // snapshot; there is no delta protocol on the wire.
        progress.report(0.5, "fetching remote snapshot");
        let latest = self.remote_latest().await?;

        let mut import = ImportStats::default();
        if let Some(descriptor) = latest {
            let bytes = self.remote_download(&descriptor.id).await?;
            progress.report(0.65, "decrypting remote snapshot");
            let snapshot = self.open_snapshot(&bytes)?;
            progress.report(0.75, "importing remote records");
            import = self.import_snapshot(&snapshot, cancel).await?;
        } else {
            debug!("no remote snapshot available, push-only pass");
        }

        progress.report(0.9, "updating sync metadata");
        self.update_metadata_after_sync(Utc::now()).await?;
        progress.report(1.0, "sync complete");

        Ok(SyncOutcome {
            status: if import.unresolved.is_empty() {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Partial
            },
            duration: started.elapsed(),
            records_pushed: pushed,
            records_pulled: import.pulled,
            conflicts_detected: import.detected,
            conflicts_resolved: import.resolved,
            unresolved_conflicts: import.unresolved,
            tables_processed: self.config.sync_tables.len(),
        })
    }

    async fn import_snapshot(
        &self,
        snapshot: &SyncSnapshot,
        cancel: &CancelToken,
    ) -> SyncResult<ImportStats> {
        let mut stats = ImportStats::default();
        for (table, records) in &snapshot.tables {
            if !self.config.sync_tables.iter().any(|t| t == table) {
                debug!("skipping snapshot table {table}: not sync-enabled here");
                continue;
            }
            cancel.check()?;
            for remote in records {
                match self.store.get_by_id(table, &remote.id).await? {
                    None => {
                        // No local counterpart: plain insert, no conflict
                        let mut record = remote.clone();
                        record.mark_synced();
                        self.store.insert(table, record).await?;
                        stats.pulled += 1;
                    }
                    Some(local) => {
                        if !local.differs_from(remote) {
                            continue;
                        }
                        if local.has_pending_changes() {
                            let conflict = SyncConflict::new(
                                table.clone(),
                                local,
                                remote.clone(),
                                Utc::now(),
                            );
                            stats.detected += 1;
                            self.settle_conflict(table, conflict, &mut stats).await?;
                        } else {
                            // Locally clean: remote is authoritative
                            let mut record = remote.clone();
                            record.mark_synced();
                            self.store.update(table, &remote.id, record).await?;
                            stats.pulled += 1;
                        }
                    }
                }
            }
        }
        Ok(stats)
    }

    async fn settle_conflict(
        &self,
        table: &str,
        conflict: SyncConflict,
        stats: &mut ImportStats,
    ) -> SyncResult<()> {
        let strategy = match self.config.conflict_policy {
            ConflictPolicy::Manual => {
                info!(
                    "parking conflict {} on {table}/{} for manual resolution",
                    conflict.id, conflict.record_id
                );
                stats.unresolved.push(conflict.id.clone());
                self.pending_conflicts
                    .lock()
                    .unwrap()
                    .insert(conflict.id.clone(), conflict);
                return Ok(());
            }
            ConflictPolicy::LastWriteWins => last_write_wins(&conflict),
            ConflictPolicy::UseLocal => ResolutionStrategy::UseLocal,
            ConflictPolicy::UseRemote => ResolutionStrategy::UseRemote,
            ConflictPolicy::Merge => ResolutionStrategy::Merge,
        };

        let resolution = conflict::resolve(&conflict, strategy, None)?;
        self.store
            .update(table, &conflict.record_id, resolution.resolved_record)
            .await?;
        stats.resolved += 1;
        debug!(
            "conflict on {table}/{} auto-resolved via {strategy:?}",
            conflict.record_id
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshot sealing
    // ------------------------------------------------------------------

    fn ensure_active_key(&self) -> SyncResult<TenantKey> {
        self.keys.derive_and_store_key(&self.config.tenant_id, false)?;
        self.keys
            .get_active_key(&self.config.tenant_id)?
            .ok_or_else(|| CryptoError::NoActiveKey(self.config.tenant_id.clone()).into())
    }

    fn seal_snapshot(&self, snapshot: &SyncSnapshot, key: &TenantKey) -> SyncResult<Vec<u8>> {
        let payload = clinisync_crypto::encrypt(&key.material, snapshot)
            .map_err(|e| IntegrityError::EncryptionFailed(e.to_string()))?;
        Ok(serde_json::to_vec(&payload)?)
    }

    /// Decrypts a downloaded blob, trying the active key first and every
    /// retained inactive key after it, then validates the snapshot checksum.
    fn open_snapshot(&self, bytes: &[u8]) -> SyncResult<SyncSnapshot> {
        let payload: EncryptedPayload = serde_json::from_slice(bytes).map_err(|e| {
            SyncError::from(IntegrityError::CorruptedData(format!(
                "unreadable payload envelope: {e}"
            )))
        })?;

        let candidates = self.keys.candidate_keys(&self.config.tenant_id)?;
        if candidates.is_empty() {
            return Err(CryptoError::NoActiveKey(self.config.tenant_id.clone()).into());
        }

        let mut plaintext = None;
        for key in &candidates {
            match decrypt_bytes(&key.material, &payload) {
                Ok(opened) => {
                    if !key.meta.is_active {
                        debug!("snapshot opened with retained key {}", key.meta.key_id);
                    }
                    plaintext = Some(opened);
                    break;
                }
                Err(CryptoError::AuthenticationFailed) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let plaintext = plaintext.ok_or_else(|| {
            SyncError::from(IntegrityError::DecryptionFailed(
                "no candidate key could open the snapshot".to_string(),
            ))
        })?;

        if !validate_integrity(&plaintext, &payload.checksum) {
            return Err(IntegrityError::ChecksumMismatch.into());
        }

        let snapshot: SyncSnapshot = serde_json::from_slice(&plaintext).map_err(|e| {
            SyncError::from(IntegrityError::CorruptedData(format!(
                "snapshot parse failed: {e}"
            )))
        })?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(IntegrityError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            }
            .into());
        }
        if !snapshot.validate_integrity() {
            return Err(
                IntegrityError::CorruptedData("snapshot checksum does not validate".to_string())
                    .into(),
            );
        }
        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Metadata bookkeeping
    // ------------------------------------------------------------------

    async fn incremental_since(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let mut oldest: Option<DateTime<Utc>> = None;
        for table in &self.config.sync_tables {
            match self
                .store
                .get_sync_metadata(table)
                .await?
                .and_then(|meta| meta.last_sync_timestamp)
            {
                Some(ts) => {
                    if oldest.is_none_or(|current| ts < current) {
                        oldest = Some(ts);
                    }
                }
                None => return Ok(None),
            }
        }
        Ok(oldest)
    }

    async fn local_last_save(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let mut newest: Option<DateTime<Utc>> = None;
        for table in &self.config.sync_tables {
            if let Some(meta) = self.store.get_sync_metadata(table).await? {
                for ts in [meta.last_sync_timestamp, meta.last_backup_timestamp]
                    .into_iter()
                    .flatten()
                {
                    if newest.is_none_or(|current| ts > current) {
                        newest = Some(ts);
                    }
                }
            }
        }
        Ok(newest)
    }

    async fn count_pending(&self, table: &str) -> SyncResult<u64> {
        Ok(self
            .store
            .changed_since(table, None)
            .await?
            .iter()
            .filter(|record| record.has_pending_changes())
            .count() as u64)
    }

    async fn update_metadata_after_sync(&self, now: DateTime<Utc>) -> SyncResult<()> {
        for table in &self.config.sync_tables {
            let mut meta = self
                .store
                .get_sync_metadata(table)
                .await?
                .unwrap_or_else(|| SyncMetadata::new(table));
            meta.last_sync_timestamp = Some(now);
            meta.last_origin_id = Some(self.config.origin_id.clone());
            meta.pending_change_count = self.count_pending(table).await?;
            self.store.set_sync_metadata(table, meta).await?;
        }
        Ok(())
    }

    async fn update_metadata_after_backup(&self, now: DateTime<Utc>) -> SyncResult<()> {
        for table in &self.config.sync_tables {
            let mut meta = self
                .store
                .get_sync_metadata(table)
                .await?
                .unwrap_or_else(|| SyncMetadata::new(table));
            meta.last_backup_timestamp = Some(now);
            meta.last_origin_id = Some(self.config.origin_id.clone());
            self.store.set_sync_metadata(table, meta).await?;
        }
        Ok(())
    }

    async fn update_metadata_after_restore(
        &self,
        now: DateTime<Utc>,
        snapshot: &SyncSnapshot,
    ) -> SyncResult<()> {
        for table in &self.config.sync_tables {
            let mut meta = self
                .store
                .get_sync_metadata(table)
                .await?
                .unwrap_or_else(|| SyncMetadata::new(table));
            meta.last_sync_timestamp = Some(now);
            meta.last_origin_id = Some(snapshot.origin_id.clone());
            meta.pending_change_count = self.count_pending(table).await?;
            self.store.set_sync_metadata(table, meta).await?;
        }
        Ok(())
    }

    async fn prune_remote(&self, now: DateTime<Utc>) -> SyncResult<usize> {
        let descriptors = self.remote_list().await?;
        let doomed = retention::prune(&descriptors, &self.config.retention, now);
        for id in &doomed {
            self.remote_delete(id).await?;
        }
        Ok(doomed.len())
    }

    // ------------------------------------------------------------------
    // Resilience-wrapped remote calls
    // ------------------------------------------------------------------

    /// Breaker wraps the retried operation, so a retry-exhausted failure
    /// counts once toward the breaker.
    async fn remote<T, F, Fut>(&self, op: F) -> SyncResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        self.breaker
            .call(|| self.retry.execute(|_attempt| op()))
            .await
            .map_err(SyncError::from)
    }

    async fn remote_upload(&self, name: &str, bytes: Vec<u8>) -> SyncResult<String> {
        let transport = Arc::clone(&self.transport);
        let name = name.to_string();
        self.remote(move || {
            let transport = Arc::clone(&transport);
            let name = name.clone();
            let bytes = bytes.clone();
            async move { transport.upload(&name, bytes).await }
        })
        .await
    }

    async fn remote_download(&self, id: &str) -> SyncResult<Vec<u8>> {
        let transport = Arc::clone(&self.transport);
        let id = id.to_string();
        self.remote(move || {
            let transport = Arc::clone(&transport);
            let id = id.clone();
            async move { transport.download(&id).await }
        })
        .await
    }

    async fn remote_list(&self) -> SyncResult<Vec<BackupDescriptor>> {
        let transport = Arc::clone(&self.transport);
        self.remote(move || {
            let transport = Arc::clone(&transport);
            async move { transport.list().await }
        })
        .await
    }

    async fn remote_latest(&self) -> SyncResult<Option<BackupDescriptor>> {
        let transport = Arc::clone(&self.transport);
        self.remote(move || {
            let transport = Arc::clone(&transport);
            async move { transport.latest().await }
        })
        .await
    }

    async fn remote_delete(&self, id: &str) -> SyncResult<()> {
        let transport = Arc::clone(&self.transport);
        let id = id.to_string();
        self.remote(move || {
            let transport = Arc::clone(&transport);
            let id = id.clone();
            async move { transport.delete(&id).await }
        })
        .await
    }

    fn begin(&self, next: EngineState) -> SyncResult<OpGuard<'_>> {
        let mut state = self.state.lock().unwrap();
        if *state != EngineState::Idle {
            return Err(OperationError::AlreadyInProgress(state.to_string()).into());
        }
        *state = next;
        Ok(OpGuard { state: &self.state })
    }
}
