//! Easel Core Integration Tests
//!
//! Drives the lock and lifecycle managers together, over the in-memory
//! stores and over shared SQLite files.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use easel_core::domain::audit::{
    AuditAction, AuditOutcome, AuditRecorder, InMemoryAuditLog, SqliteAuditLog,
};
use easel_core::domain::clock::ManualClock;
use easel_core::domain::events::InMemoryEventStore;
use easel_core::domain::lifecycle::{
    ActorAllowList, InMemoryResourceRepository, LifecycleError, LifecycleManager, LifecycleState,
    SqliteResourceRepository,
};
use easel_core::domain::locking::{
    InMemoryLeaseStore, LockConfig, LockError, LockManager, LockTier, ReleaseOutcome,
    SqliteLeaseStore,
};
use easel_core::storage::Database;

struct Harness {
    locks: LockManager,
    lifecycle: LifecycleManager,
    audit: Arc<InMemoryAuditLog>,
    events: Arc<InMemoryEventStore>,
    clock: ManualClock,
}

fn harness() -> Harness {
    let audit = Arc::new(InMemoryAuditLog::new());
    let events = Arc::new(InMemoryEventStore::new());
    let clock = ManualClock::starting_now();

    let locks = LockManager::new(
        Arc::new(InMemoryLeaseStore::new()),
        audit.clone(),
        LockConfig::default(),
    )
    .with_publisher(events.clone())
    .with_clock(Arc::new(clock.clone()));

    let lifecycle = LifecycleManager::new(
        Arc::new(InMemoryResourceRepository::new()),
        locks,
        audit.clone(),
    )
    .with_publisher(events.clone());
    let locks = lifecycle.locks().clone();

    Harness {
        locks,
        lifecycle,
        audit,
        events,
        clock,
    }
}

async fn sqlite_manager(db: &Database) -> LockManager {
    LockManager::new(
        Arc::new(SqliteLeaseStore::new(db.pool().clone())),
        Arc::new(SqliteAuditLog::new(db.pool().clone())),
        LockConfig::default(),
    )
}

#[tokio::test]
async fn test_emergency_override_scenario() {
    let h = harness();

    let a_lock = h
        .locks
        .acquire("R1", "A", LockTier::Edit, Some(Duration::from_secs(300)), "layout")
        .await
        .unwrap();

    let status = h.locks.status("R1").await.unwrap();
    assert!(status.held);
    assert_eq!(status.holder_id.as_deref(), Some("A"));

    let err = h
        .locks
        .acquire("R1", "B", LockTier::Edit, None, "copy edits")
        .await
        .unwrap_err();
    match err {
        LockError::Conflict {
            current_holder,
            tier,
            expires_at,
            ..
        } => {
            assert_eq!(current_holder, "A");
            assert_eq!(tier, LockTier::Edit);
            assert_eq!(expires_at, a_lock.expires_at);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    let b_lock = h
        .locks
        .override_lock("R1", "B", LockTier::Emergency, "incident")
        .await
        .unwrap();
    assert_eq!(b_lock.tier, LockTier::Emergency);
    assert_eq!(b_lock.purpose, "incident");

    let status = h.locks.status("R1").await.unwrap();
    assert_eq!(status.holder_id.as_deref(), Some("B"));
    assert_eq!(status.tier, Some(LockTier::Emergency));

    // A's lock is gone: refresh fails and release is a no-op
    assert!(h.locks.refresh(a_lock.id, "A", None).await.is_err());
    assert_eq!(
        h.locks.release(a_lock.id, "A").await.unwrap(),
        ReleaseOutcome::AlreadyReleased
    );

    let overrides = h.audit.by_action(AuditAction::Override);
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].reason.as_deref(), Some("incident"));
    assert_eq!(overrides[0].actor_id, "B");
    assert_eq!(h.events.events_by_type("lock_conflict").len(), 1);
    assert_eq!(h.events.events_by_type("lock_overridden").len(), 1);
}

#[tokio::test]
async fn test_acquire_after_unrefreshed_expiry_scenario() {
    let h = harness();

    h.locks
        .acquire("R2", "A", LockTier::Edit, Some(Duration::from_secs(60)), "sketch")
        .await
        .unwrap();

    h.clock.advance(Duration::from_secs(61));

    let status = h.locks.status("R2").await.unwrap();
    assert!(!status.held);
    assert!(status.holder_id.is_none());

    let c_lock = h
        .locks
        .acquire("R2", "C", LockTier::Edit, None, "finish sketch")
        .await
        .unwrap();
    assert_eq!(c_lock.holder_id, "C");

    assert!(h.audit.by_action(AuditAction::Override).is_empty());
    assert_eq!(h.events.events_by_type("lock_expired").len(), 1);
    assert_eq!(h.events.events_by_type("lock_acquired").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_has_single_winner() {
    let h = harness();

    let attempts = (0..16).map(|i| {
        let locks = h.locks.clone();
        tokio::spawn(async move {
            locks
                .acquire("hot", &format!("editor-{i}"), LockTier::Edit, None, "race")
                .await
        })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LockError::Conflict { .. }))
    );

    let status = h.locks.status("hot").await.unwrap();
    assert_eq!(status.holder_id.as_deref(), Some(winners[0].holder_id.as_str()));
    assert_eq!(h.audit.count().await.unwrap(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_processes_sharing_a_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("easel.db");

    let first = Database::open(&path).await.unwrap();
    let second = Database::open(&path).await.unwrap();
    let left = sqlite_manager(&first).await;
    let right = sqlite_manager(&second).await;

    let attempts = (0..8).map(|i| {
        let manager = if i % 2 == 0 { left.clone() } else { right.clone() };
        tokio::spawn(async move {
            manager
                .acquire("shared", &format!("host-{i}"), LockTier::System, None, "batch")
                .await
        })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LockError::Conflict { .. }))
    );

    // Both handles agree on the holder
    let seen_left = left.status("shared").await.unwrap();
    let seen_right = right.status("shared").await.unwrap();
    assert!(seen_left.held);
    assert_eq!(seen_left.lock_id, seen_right.lock_id);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let h = harness();
    let lock = h
        .locks
        .acquire("R3", "A", LockTier::Edit, None, "")
        .await
        .unwrap();

    let first = h.locks.release(lock.id, "A").await.unwrap();
    let second = h.locks.release(lock.id, "A").await.unwrap();

    assert!(matches!(first, ReleaseOutcome::Released(_)));
    assert_eq!(second, ReleaseOutcome::AlreadyReleased);
    assert!(!h.locks.status("R3").await.unwrap().held);

    let releases = h.audit.by_action(AuditAction::Release);
    assert_eq!(releases.len(), 2);
    assert_eq!(releases[0].outcome, AuditOutcome::Released);
    assert_eq!(releases[1].outcome, AuditOutcome::AlreadyReleased);
}

#[tokio::test]
async fn test_override_requires_reason_and_higher_tier() {
    let h = harness();
    h.locks
        .acquire("R4", "ops-bot", LockTier::System, None, "reindex")
        .await
        .unwrap();

    let missing = h
        .locks
        .override_lock("R4", "B", LockTier::Emergency, "   ")
        .await
        .unwrap_err();
    assert_eq!(missing, LockError::MissingReason);

    let same_tier = h
        .locks
        .override_lock("R4", "B", LockTier::System, "need it")
        .await
        .unwrap_err();
    assert!(matches!(same_tier, LockError::InsufficientTier { .. }));

    // Refusals are audited and leave the incumbent in place
    assert_eq!(h.audit.by_action(AuditAction::Override).len(), 2);
    let status = h.locks.status("R4").await.unwrap();
    assert_eq!(status.holder_id.as_deref(), Some("ops-bot"));
}

#[tokio::test]
async fn test_archive_blocked_by_foreign_lock() {
    let h = harness();
    h.lifecycle
        .register(Some("canvas"), "Poster", "ann")
        .await
        .unwrap();
    h.locks
        .acquire("canvas", "bob", LockTier::Edit, None, "touch-ups")
        .await
        .unwrap();

    let err = h.lifecycle.archive("canvas", "ann").await.unwrap_err();
    assert!(matches!(err, LifecycleError::Locked { ref holder_id, .. } if holder_id == "bob"));
    assert_eq!(
        h.lifecycle.get("canvas").await.unwrap().lifecycle_state,
        LifecycleState::Active
    );

    // Once bob's lease lapses the archive goes through
    h.clock.advance(Duration::from_secs(301));
    let archived = h.lifecycle.archive("canvas", "ann").await.unwrap();
    assert_eq!(archived.lifecycle_state, LifecycleState::Archived);
    assert_eq!(archived.archived_by.as_deref(), Some("ann"));
}

#[tokio::test]
async fn test_archive_releases_archivers_own_lock() {
    let h = harness();
    h.lifecycle
        .register(Some("canvas"), "Poster", "ann")
        .await
        .unwrap();
    let lock = h
        .locks
        .acquire("canvas", "ann", LockTier::Edit, None, "wrap up")
        .await
        .unwrap();

    h.lifecycle.archive("canvas", "ann").await.unwrap();

    assert!(!h.locks.status("canvas").await.unwrap().held);
    assert_eq!(h.events.events_by_type("lock_released").len(), 1);
    assert_eq!(h.events.events_by_type("resource_archived").len(), 1);

    // One entry for the archive, carrying the released lock
    assert!(h.audit.by_action(AuditAction::Release).is_empty());
    let archives = h.audit.by_action(AuditAction::Archive);
    assert_eq!(archives.len(), 1);
    assert_eq!(
        archives[0].detail.as_ref().unwrap()["released_locks"],
        serde_json::json!([lock.id])
    );
}

#[tokio::test]
async fn test_deleted_resource_takes_no_new_leases() {
    let h = harness();
    h.lifecycle
        .register(Some("canvas"), "Poster", "ann")
        .await
        .unwrap();
    h.lifecycle.archive("canvas", "ann").await.unwrap();
    h.lifecycle.permanent_delete("canvas", "ann").await.unwrap();

    let err = h
        .locks
        .acquire("canvas", "bob", LockTier::Edit, None, "")
        .await
        .unwrap_err();
    assert_eq!(err, LockError::ResourceNotFound("canvas".to_string()));

    let err = h
        .locks
        .acquire("canvas", "bob", LockTier::View, None, "")
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::ResourceNotFound(_)));

    let err = h
        .locks
        .override_lock("canvas", "ops", LockTier::Emergency, "incident")
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::ResourceNotFound(_)));

    let status = h.locks.status("canvas").await.unwrap();
    assert!(!status.held);
    assert!(status.viewers.is_empty());
    assert!(h.locks.active_locks().await.unwrap().is_empty());

    // Unregistered ids are still lockable
    assert!(h
        .locks
        .acquire("scratch", "bob", LockTier::Edit, None, "")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_delete_requires_archive_first() {
    let h = harness();
    h.lifecycle
        .register(Some("canvas"), "Poster", "ann")
        .await
        .unwrap();

    let err = h
        .lifecycle
        .permanent_delete("canvas", "ann")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotArchived { .. }));
    assert!(h.lifecycle.get("canvas").await.unwrap().is_active());

    h.lifecycle.archive("canvas", "ann").await.unwrap();
    h.lifecycle.permanent_delete("canvas", "ann").await.unwrap();

    assert!(matches!(
        h.lifecycle.get("canvas").await.unwrap_err(),
        LifecycleError::NotFound(_)
    ));
    assert!(matches!(
        h.lifecycle.restore("canvas", "ann").await.unwrap_err(),
        LifecycleError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_delete_policy_and_lease_purge() {
    let h = harness();
    let lifecycle = h
        .lifecycle
        .clone()
        .with_policy(Arc::new(ActorAllowList::new(["admin"])));

    lifecycle.register(Some("canvas"), "Poster", "ann").await.unwrap();
    h.locks
        .acquire("canvas", "viewer", LockTier::View, None, "peek")
        .await
        .unwrap();
    lifecycle.archive("canvas", "ann").await.unwrap();

    let err = lifecycle.permanent_delete("canvas", "ann").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotAuthorized { .. }));

    lifecycle.permanent_delete("canvas", "admin").await.unwrap();
    assert!(h.locks.status("canvas").await.unwrap().viewers.is_empty());

    let deletes = h.audit.by_action(AuditAction::PermanentDelete);
    assert_eq!(deletes.len(), 2);
    assert_eq!(deletes[0].outcome, AuditOutcome::Rejected);
    assert_eq!(deletes[1].outcome, AuditOutcome::Deleted);
}

#[tokio::test]
async fn test_sweeper_expires_and_audits() {
    let h = harness();
    h.locks
        .acquire("R5", "A", LockTier::Edit, Some(Duration::from_secs(30)), "")
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(31));

    let report = h.locks.sweeper().sweep_once().await.unwrap();
    assert_eq!(report.expired, 1);

    let expiries = h.audit.by_action(AuditAction::Expire);
    assert_eq!(expiries.len(), 1);
    assert_eq!(expiries[0].outcome, AuditOutcome::Expired);
    assert!(h.locks.active_locks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_lifecycle_over_sqlite() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool().clone();
    let audit = Arc::new(SqliteAuditLog::new(pool.clone()));

    let locks = LockManager::new(
        Arc::new(SqliteLeaseStore::new(pool.clone())),
        audit.clone(),
        LockConfig::default(),
    );
    let lifecycle = LifecycleManager::new(
        Arc::new(SqliteResourceRepository::new(pool)),
        locks,
        audit.clone(),
    );
    let locks = lifecycle.locks().clone();

    lifecycle.register(Some("deck"), "Q3 deck", "ann").await.unwrap();
    let lock = locks
        .acquire("deck", "ann", LockTier::Edit, None, "numbers")
        .await
        .unwrap();
    locks.refresh(lock.id, "ann", None).await.unwrap();
    lifecycle.archive("deck", "ann").await.unwrap();
    lifecycle.restore("deck", "ann").await.unwrap();
    lifecycle.archive("deck", "ann").await.unwrap();
    lifecycle.permanent_delete("deck", "ann").await.unwrap();

    let actions: Vec<AuditAction> = audit
        .entries_for("deck", None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Register,
            AuditAction::Acquire,
            AuditAction::Refresh,
            AuditAction::Archive,
            AuditAction::Restore,
            AuditAction::Archive,
            AuditAction::PermanentDelete,
        ]
    );
}
