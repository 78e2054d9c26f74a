mod support;

use chrono::{Duration, Utc};
use clinisync_engine::{
    BlobTransport, CancelToken, ConflictPolicy, EngineState, IntegrityError, OperationError,
    OutcomeStatus, ReconcileAction, RecordStore, ResolutionStrategy, SyncEngine, SyncError,
};
use clinisync_types::SyncMetadata;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use support::{fast_config, patient, seed_remote_backup, test_rig, FailingTransport, TENANT};

#[tokio::test]
async fn backup_then_restore_roundtrip() {
    support::init_tracing();
    let rig = test_rig(fast_config(&["patients", "appointments"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();
    rig.store
        .insert("appointments", patient("a1", "Checkup", 200, true))
        .await
        .unwrap();

    let outcome = rig.engine.backup(&cancel).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.records_pushed, 2);
    assert_eq!(rig.transport.blob_count(), 1);

    // A second device with an empty store but the same tenant keys
    let other = test_rig(fast_config(&["patients", "appointments"]));
    let fresh = clinisync_engine::SyncEngine::new(
        fast_config(&["patients", "appointments"]),
        rig.keys.clone(),
        rig.transport.clone(),
        other.store.clone(),
    );

    let outcome = fresh.restore(None, &cancel).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.records_pulled, 2);

    let restored = other.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert_eq!(restored.get("name"), Some(&json!("Ada")));
    assert!(!restored.has_pending_changes());
}

#[tokio::test]
async fn backup_blob_is_ciphertext_only() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Ada Lovelace", 100, true))
        .await
        .unwrap();
    rig.engine.backup(&cancel).await.unwrap();

    let descriptor = rig.transport.latest().await.unwrap().unwrap();
    let blob = rig.transport.download(&descriptor.id).await.unwrap();
    let haystack = String::from_utf8_lossy(&blob);
    assert!(!haystack.contains("Ada Lovelace"));
    assert!(!haystack.contains("patients"));
}

#[tokio::test]
async fn full_sync_pushes_pending_and_marks_synced() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();
    rig.store
        .insert("patients", patient("p2", "Grace", 50, false))
        .await
        .unwrap();

    let outcome = rig.engine.full_sync(&cancel).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.records_pushed, 1);

    let p1 = rig.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert!(!p1.has_pending_changes());

    let meta = rig
        .store
        .get_sync_metadata("patients")
        .await
        .unwrap()
        .unwrap();
    assert!(meta.last_sync_timestamp.is_some());
    assert_eq!(meta.pending_change_count, 0);
    assert_eq!(meta.last_origin_id.as_deref(), Some("device-1"));
}

#[tokio::test]
async fn sync_pulls_records_pushed_by_another_device() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    // Another device backed up a record this device has never seen
    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p9", "Remote", 500, false)]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    let outcome = rig.engine.sync(&cancel).await.unwrap();
    assert_eq!(outcome.records_pulled, 1);

    let pulled = rig.store.get_by_id("patients", "p9").await.unwrap().unwrap();
    assert_eq!(pulled.get("name"), Some(&json!("Remote")));
    assert!(!pulled.has_pending_changes());
}

#[tokio::test]
async fn clean_local_record_is_overwritten_by_remote_without_conflict() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Old", 100, false))
        .await
        .unwrap();

    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p1", "New", 200, false)]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    let outcome = rig.engine.sync(&cancel).await.unwrap();
    assert_eq!(outcome.conflicts_detected, 0);
    assert_eq!(outcome.records_pulled, 1);

    let p1 = rig.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert_eq!(p1.get("name"), Some(&json!("New")));
}

#[tokio::test]
async fn conflicting_pending_record_resolves_last_write_wins() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Local", 100, true))
        .await
        .unwrap();

    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p1", "Remote", 200, false)]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    let outcome = rig.engine.restore(None, &cancel).await.unwrap();
    assert_eq!(outcome.conflicts_detected, 1);
    assert_eq!(outcome.conflicts_resolved, 1);

    let p1 = rig.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert_eq!(p1.get("name"), Some(&json!("Remote")));
}

#[tokio::test]
async fn lww_tie_keeps_the_local_record() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Local", 100, true))
        .await
        .unwrap();

    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p1", "Remote", 100, false)]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    rig.engine.restore(None, &cancel).await.unwrap();

    let p1 = rig.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert_eq!(p1.get("name"), Some(&json!("Local")));
    // Still pending, so the local edit uploads on the next sync
    assert!(p1.has_pending_changes());
}

#[tokio::test]
async fn merge_policy_merges_field_by_field() {
    let rig = test_rig(
        fast_config(&["patients"]).with_conflict_policy(ConflictPolicy::Merge),
    );
    let cancel = CancelToken::new();

    let mut local = patient("p1", "Local", 100, true);
    local.set("phone", "");
    local.set("visits", 3);
    rig.store.insert("patients", local).await.unwrap();

    let mut remote = patient("p1", "Remote", 200, false);
    remote.set("phone", "555-0100");
    remote.set("visits", 7);
    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![remote]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    rig.engine.restore(None, &cancel).await.unwrap();

    let merged = rig.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert_eq!(merged.get("name"), Some(&json!("Local")));
    assert_eq!(merged.get("phone"), Some(&json!("555-0100")));
    assert_eq!(merged.get("visits"), Some(&json!(7)));
    assert!(merged.has_pending_changes());
}

#[tokio::test]
async fn manual_policy_parks_conflicts_for_the_caller() {
    let rig = test_rig(
        fast_config(&["patients"]).with_conflict_policy(ConflictPolicy::Manual),
    );
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "A", 100, true))
        .await
        .unwrap();

    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p1", "B", 200, false)]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    let outcome = rig.engine.restore(None, &cancel).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Partial);
    assert_eq!(outcome.unresolved_conflicts.len(), 1);

    let parked = rig.engine.pending_conflicts();
    assert_eq!(parked.len(), 1);
    let conflict_id = parked[0].id.clone();

    // Caller supplies the resolved record directly
    let supplied = patient("p1", "C", 300, true);
    let resolution = rig
        .engine
        .resolve_conflict(&conflict_id, ResolutionStrategy::Manual, Some(supplied))
        .await
        .unwrap();
    assert_eq!(resolution.resolved_record.get("name"), Some(&json!("C")));

    let p1 = rig.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert_eq!(p1.get("name"), Some(&json!("C")));
    assert!(rig.engine.pending_conflicts().is_empty());
}

#[tokio::test]
async fn tampered_snapshot_fails_restore_and_leaves_local_untouched() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Untouched", 100, false))
        .await
        .unwrap();

    // Build a snapshot, then corrupt its tables after the checksum was sealed
    rig.keys.derive_and_store_key(TENANT, false).unwrap();
    let key = rig.keys.get_active_key(TENANT).unwrap().unwrap();
    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p1", "Evil", 999, false)]);
    let mut snapshot = clinisync_types::SyncSnapshot::new(
        TENANT,
        "device-2",
        Utc::now(),
        tables,
        serde_json::Map::new(),
    )
    .unwrap();
    snapshot
        .tables
        .get_mut("patients")
        .unwrap()
        .push(patient("p2", "Sneaky", 999, false));
    let payload = clinisync_crypto::encrypt(&key.material, &snapshot).unwrap();
    let bytes = serde_json::to_vec(&payload).unwrap();
    let name = clinisync_engine::naming::backup_blob_name(TENANT, snapshot.timestamp);
    rig.transport.upload(&name, bytes).await.unwrap();

    let err = rig.engine.restore(None, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Integrity(IntegrityError::CorruptedData(_))
    ));

    // Local store untouched
    let p1 = rig.store.get_by_id("patients", "p1").await.unwrap().unwrap();
    assert_eq!(p1.get("name"), Some(&json!("Untouched")));
    assert!(rig.store.get_by_id("patients", "p2").await.unwrap().is_none());
}

#[tokio::test]
async fn restore_succeeds_with_retained_key_after_rotation() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();
    rig.engine.backup(&cancel).await.unwrap();

    // Rotate: the backup is now under an inactive key
    rig.keys.rotate_key(TENANT).unwrap();

    let outcome = rig.engine.restore(None, &cancel).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success);
}

#[tokio::test]
async fn incremental_sync_scopes_to_changes_since_last_pass() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    // First pass establishes the per-table sync timestamp
    rig.engine.sync(&cancel).await.unwrap();

    // A pending record whose last_modified predates the sync point
    rig.store
        .insert("patients", patient("p1", "Old Edit", 1000, true))
        .await
        .unwrap();

    let outcome = rig.engine.sync(&cancel).await.unwrap();
    assert_eq!(outcome.records_pushed, 0);

    // A full sync picks it up regardless of timestamps
    let outcome = rig.engine.full_sync(&cancel).await.unwrap();
    assert_eq!(outcome.records_pushed, 1);
}

#[tokio::test]
async fn second_operation_is_rejected_while_one_is_in_flight() {
    let config = fast_config(&["patients"]);
    let store = Arc::new(clinisync_engine::MemoryRecordStore::new());
    let transport = Arc::new(support::GatedTransport::new());
    let keys = Arc::new(
        clinisync_crypto::KeyManager::new(Arc::new(clinisync_crypto::MemorySecretStore::new()))
            .with_kdf_params(clinisync_crypto::KdfParams::fast()),
    );
    let engine = Arc::new(SyncEngine::new(
        config,
        keys,
        transport.clone(),
        store.clone(),
    ));

    store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();

    let cancel = CancelToken::new();
    let running = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.backup(&cancel).await })
    };

    // Let the backup reach its gated upload
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(engine.state(), EngineState::BackingUp);

    let err = engine.sync(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Operation(OperationError::AlreadyInProgress(_))
    ));

    transport.release();
    running.await.unwrap().unwrap();
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn cancelled_backup_uploads_nothing() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();
    cancel.cancel();

    rig.store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();

    let err = rig.engine.backup(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Operation(OperationError::Cancelled)
    ));
    assert_eq!(rig.transport.blob_count(), 0);
    assert_eq!(rig.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn reconcile_backs_up_when_remote_is_empty() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    rig.store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();

    let (action, outcome) = rig.engine.reconcile(&cancel).await.unwrap();
    assert_eq!(action, ReconcileAction::Backup);
    assert_eq!(outcome.records_pushed, 1);
    assert_eq!(rig.transport.blob_count(), 1);
}

#[tokio::test]
async fn reconcile_restores_when_remote_is_newer() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    // Local saved long ago; remote blob is newer
    let mut meta = SyncMetadata::new("patients");
    meta.last_backup_timestamp = Some(Utc::now() - Duration::days(3));
    rig.store.set_sync_metadata("patients", meta).await.unwrap();

    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p7", "Newer", 700, false)]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    let (action, outcome) = rig.engine.reconcile(&cancel).await.unwrap();
    assert_eq!(action, ReconcileAction::Restore);
    assert_eq!(outcome.records_pulled, 1);
}

#[tokio::test]
async fn reconcile_restores_when_no_local_save_time_exists() {
    let rig = test_rig(fast_config(&["patients"]));
    let cancel = CancelToken::new();

    let mut tables = BTreeMap::new();
    tables.insert("patients".to_string(), vec![patient("p7", "Remote", 700, false)]);
    seed_remote_backup(&rig.transport, &rig.keys, "device-2", tables, Utc::now()).await;

    let (action, _) = rig.engine.reconcile(&cancel).await.unwrap();
    assert_eq!(action, ReconcileAction::Restore);
}

#[tokio::test]
async fn backup_prunes_old_blobs_per_retention_policy() {
    let mut config = fast_config(&["patients"]);
    config.retention = clinisync_engine::RetentionPolicy {
        max_daily: 1,
        max_monthly: 0,
        max_yearly: 0,
        max_age_days: None,
    };
    let rig = test_rig(config);
    let cancel = CancelToken::new();

    // Stale remote backups from previous days
    for days_ago in [10, 5] {
        let mut tables = BTreeMap::new();
        tables.insert("patients".to_string(), vec![patient("old", "Old", 1, false)]);
        seed_remote_backup(
            &rig.transport,
            &rig.keys,
            "device-2",
            tables,
            Utc::now() - Duration::days(days_ago),
        )
        .await;
    }
    assert_eq!(rig.transport.blob_count(), 2);

    rig.store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();
    rig.engine.backup(&cancel).await.unwrap();

    // Only today's backup survives the daily window
    assert_eq!(rig.transport.blob_count(), 1);
}

#[tokio::test]
async fn progress_is_monotonic_and_reaches_completion() {
    let seen: Arc<Mutex<Vec<(f64, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let rig = test_rig(fast_config(&["patients"]));
    let engine = SyncEngine::new(
        fast_config(&["patients"]),
        rig.keys.clone(),
        rig.transport.clone(),
        rig.store.clone(),
    )
    .with_progress(Arc::new(move |fraction, step: &str| {
        sink.lock().unwrap().push((fraction, step.to_string()));
    }));

    rig.store
        .insert("patients", patient("p1", "Ada", 100, true))
        .await
        .unwrap();
    engine.backup(&CancelToken::new()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    let fractions: Vec<f64> = seen.iter().map(|(f, _)| *f).collect();
    let mut sorted = fractions.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(fractions, sorted, "progress must never decrease");
    assert_eq!(*fractions.last().unwrap(), 1.0);
}

#[tokio::test]
async fn breaker_opens_after_repeated_remote_failures() {
    let mut config = fast_config(&["patients"]);
    config.breaker.failure_threshold = 1;
    let store = Arc::new(clinisync_engine::MemoryRecordStore::new());
    let transport = Arc::new(FailingTransport::default());
    let keys = Arc::new(
        clinisync_crypto::KeyManager::new(Arc::new(clinisync_crypto::MemorySecretStore::new()))
            .with_kdf_params(clinisync_crypto::KdfParams::fast()),
    );
    let engine = SyncEngine::new(config, keys, transport.clone(), store);
    let cancel = CancelToken::new();

    // First pass hits the transport and fails
    let err = engine.sync(&cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    let calls_after_first = transport.calls.load(std::sync::atomic::Ordering::SeqCst);
    assert!(calls_after_first > 0);

    // Second pass fails fast: the breaker is open, transport untouched
    let err = engine.sync(&cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::CircuitOpen));
    assert_eq!(
        transport.calls.load(std::sync::atomic::Ordering::SeqCst),
        calls_after_first
    );
}

#[tokio::test]
async fn restore_of_missing_named_blob_is_not_found() {
    let rig = test_rig(fast_config(&["patients"]));
    let err = rig
        .engine
        .restore(Some("clinic-1_2020-01-01T00-00-00.000Z.enc"), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Storage(clinisync_engine::StorageError::NotFound(_))
    ));
}
