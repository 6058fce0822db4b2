//! Background expiry sweeper
//!
//! Expiry is already enforced lazily on every read, so the sweeper is purely
//! corrective. A lease past its expiry is turned into an inactive tombstone
//! and its `lock_expired` notification goes out. The tombstone keeps a late
//! refresh answering `Expired` until `tombstone_retention` has passed; release
//! tombstones are cleared on the next pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::LockEvent;
use super::store::{bounded, CasOutcome, LeaseStore, VersionedLock};
use super::types::{Lock, LockResult};
use crate::domain::audit::{AuditAction, AuditEntry, AuditOutcome, AuditRecorder};
use crate::domain::clock::{expiry_after, Clock};
use crate::domain::events::EventPublisher;

/// Actor recorded for sweeper-initiated expiries
pub const SWEEPER_ACTOR: &str = "easel:sweeper";

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Active leases retired because they ran out
    pub expired: usize,
    /// Tombstones removed
    pub purged: usize,
    /// Records skipped because the store call failed
    pub failed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired + self.purged
    }
}

impl std::ops::AddAssign for SweepReport {
    fn add_assign(&mut self, other: Self) {
        self.expired += other.expired;
        self.purged += other.purged;
        self.failed += other.failed;
    }
}

/// Periodic cleanup of expired and released leases
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn LeaseStore>,
    audit: Arc<dyn AuditRecorder>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    store_timeout: Duration,
    tombstone_retention: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper; see also `LockManager::sweeper`
    pub fn new(
        store: Arc<dyn LeaseStore>,
        audit: Arc<dyn AuditRecorder>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            publisher,
            clock,
            interval,
            store_timeout: Duration::from_secs(5),
            tombstone_retention: Duration::from_secs(3600),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single pass over the store
    ///
    /// Writes are version-checked, so a lease refreshed or re-acquired between
    /// the scan and the write is left alone. A record whose write fails is
    /// logged, counted in `failed` and picked up again on the next pass.
    pub async fn sweep_once(&self) -> LockResult<SweepReport> {
        let now = self.clock.now();
        let records = bounded(self.store_timeout, "list_all", self.store.list_all()).await?;
        let mut report = SweepReport::default();

        for record in records {
            let lock = &record.lock;
            let result = if lock.active {
                if !lock.is_expired_at(now) {
                    continue;
                }
                self.retire(&record).await
            } else if self.tombstone_due(lock, now) {
                self.purge(&record).await
            } else {
                continue;
            };

            match result {
                Ok(true) if lock.active => {
                    report.expired += 1;
                    self.announce_expiry(lock, now).await;
                }
                Ok(true) => report.purged += 1,
                Ok(false) => {
                    debug!(lease = %lock.lease_key(), "Lease changed before sweep, skipping");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(lease = %lock.lease_key(), error = %e, "Failed to sweep lease");
                }
            }
        }

        Ok(report)
    }

    /// Released tombstones go at once; expiry tombstones after the retention
    fn tombstone_due(&self, lock: &Lock, now: DateTime<Utc>) -> bool {
        lock.is_released() || now > expiry_after(lock.expires_at, self.tombstone_retention)
    }

    async fn retire(&self, record: &VersionedLock) -> LockResult<bool> {
        let mut tombstone = record.lock.clone();
        tombstone.retire();
        let outcome = bounded(
            self.store_timeout,
            "compare_and_swap",
            self.store.compare_and_swap(Some(record.version), &tombstone),
        )
        .await?;
        Ok(matches!(outcome, CasOutcome::Written { .. }))
    }

    async fn purge(&self, record: &VersionedLock) -> LockResult<bool> {
        bounded(
            self.store_timeout,
            "delete_if_version",
            self.store
                .delete_if_version(&record.lock.lease_key(), record.version),
        )
        .await
    }

    async fn announce_expiry(&self, lock: &Lock, now: DateTime<Utc>) {
        info!(
            resource_id = %lock.resource_id,
            holder_id = %lock.holder_id,
            lock_id = %lock.id,
            expired_at = %lock.expires_at,
            "Lease expired"
        );

        let entry = AuditEntry::new(
            &lock.resource_id,
            SWEEPER_ACTOR,
            AuditAction::Expire,
            AuditOutcome::Expired,
            now,
        )
        .with_lock(lock)
        .with_detail(json!({
            "holder_id": lock.holder_id,
            "expired_at": lock.expires_at,
        }));
        if let Err(e) = self.audit.record(&entry).await {
            error!(resource_id = %lock.resource_id, error = %e, "Failed to write audit entry");
        }

        let event = LockEvent::expired(lock, SWEEPER_ACTOR, now);
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(resource_id = %lock.resource_id, error = %e, "Failed to publish lock event");
        }
    }

    /// Run until `cancel` fires
    ///
    /// A failed pass is logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Expiry sweeper started (interval: {:?})", self.interval);

        let mut totals = SweepReport::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => {
                            if report.total() > 0 || report.failed > 0 {
                                debug!(
                                    expired = report.expired,
                                    purged = report.purged,
                                    failed = report.failed,
                                    "Sweep completed"
                                );
                            }
                            totals += report;
                        }
                        Err(e) => {
                            warn!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
        }

        info!(
            expired = totals.expired,
            purged = totals.purged,
            failed = totals.failed,
            "Expiry sweeper stopped"
        );
    }

    /// Run on a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::InMemoryAuditLog;
    use crate::domain::clock::ManualClock;
    use crate::domain::events::InMemoryEventStore;
    use crate::domain::locking::{LeaseKey, LockConfig, LockError, LockManager, LockTier, ReleaseOutcome};
    use crate::domain::locking::store::InMemoryLeaseStore;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct Harness {
        manager: LockManager,
        sweeper: ExpirySweeper,
        clock: Arc<ManualClock>,
        audit: Arc<InMemoryAuditLog>,
        events: Arc<InMemoryEventStore>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(InMemoryAuditLog::new());
        let events = Arc::new(InMemoryEventStore::new());
        let manager = LockManager::new(
            Arc::new(InMemoryLeaseStore::new()),
            audit.clone(),
            LockConfig::default().with_sweep_interval(Duration::from_millis(10)),
        )
        .with_clock(clock.clone())
        .with_publisher(events.clone());
        let sweeper = manager.sweeper();

        Harness {
            manager,
            sweeper,
            clock,
            audit,
            events,
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_leases() {
        let h = harness();
        h.manager
            .acquire("r1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();
        h.manager
            .acquire("r2", "bob", LockTier::Edit, Some(Duration::from_secs(600)), "")
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(61));
        let report = h.sweeper.sweep_once().await.unwrap();

        assert_eq!(report, SweepReport { expired: 1, purged: 0, failed: 0 });
        let expired = h.events.events_by_type("lock_expired");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].actor_id, SWEEPER_ACTOR);
        assert_eq!(expired[0].data.as_ref().unwrap()["holder_id"], "ann");
        assert_eq!(h.audit.by_action(AuditAction::Expire).len(), 1);

        assert_eq!(h.manager.active_locks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_purges_tombstones_without_audit() {
        let h = harness();
        let lock = h
            .manager
            .acquire("r1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();
        h.manager.release(lock.id, "ann").await.unwrap();

        let report = h.sweeper.sweep_once().await.unwrap();

        assert_eq!(report, SweepReport { expired: 0, purged: 1, failed: 0 });
        assert!(h.audit.by_action(AuditAction::Expire).is_empty());
        assert!(h.events.events_by_type("lock_expired").is_empty());
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_leases() {
        let h = harness();
        h.manager
            .acquire("r1", "ann", LockTier::View, None, "")
            .await
            .unwrap();

        let report = h.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(h.manager.status("r1").await.unwrap().viewers, vec!["ann".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_after_sweep_still_reports_expired() {
        let h = harness();
        let lock = h
            .manager
            .acquire("r1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(61));

        let before = h.manager.refresh(lock.id, "ann", None).await.unwrap_err();
        assert!(matches!(before, LockError::Expired { .. }));

        assert_eq!(h.sweeper.sweep_once().await.unwrap().expired, 1);

        let after = h.manager.refresh(lock.id, "ann", None).await.unwrap_err();
        assert_eq!(after, before);
        assert_eq!(
            h.manager.release(lock.id, "ann").await.unwrap(),
            ReleaseOutcome::AlreadyReleased
        );

        // The tombstone is neither expired twice nor purged early
        assert_eq!(h.sweeper.sweep_once().await.unwrap().total(), 0);
        assert_eq!(h.events.events_by_type("lock_expired").len(), 1);

        h.clock.advance(Duration::from_secs(3601));
        assert_eq!(h.sweeper.sweep_once().await.unwrap().purged, 1);
        let purged = h.manager.refresh(lock.id, "ann", None).await.unwrap_err();
        assert!(matches!(purged, LockError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_expiry_tombstone_does_not_block_acquire() {
        let h = harness();
        h.manager
            .acquire("r1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(61));
        h.sweeper.sweep_once().await.unwrap();

        let lock = h
            .manager
            .acquire("r1", "bob", LockTier::Edit, None, "")
            .await
            .unwrap();

        assert_eq!(lock.holder_id, "bob");
        assert_eq!(h.events.events_by_type("lock_expired").len(), 1);
    }

    /// Lease store that fails deletes for one resource
    #[derive(Debug)]
    struct FailingDeletes {
        inner: InMemoryLeaseStore,
        resource_id: &'static str,
    }

    #[async_trait]
    impl LeaseStore for FailingDeletes {
        async fn get(&self, key: &LeaseKey) -> LockResult<Option<VersionedLock>> {
            self.inner.get(key).await
        }

        async fn find_by_lock_id(&self, lock_id: Uuid) -> LockResult<Option<VersionedLock>> {
            self.inner.find_by_lock_id(lock_id).await
        }

        async fn compare_and_swap(&self, expected: Option<u64>, lock: &Lock) -> LockResult<CasOutcome> {
            self.inner.compare_and_swap(expected, lock).await
        }

        async fn delete_if_version(&self, key: &LeaseKey, version: u64) -> LockResult<bool> {
            if key.resource_id == self.resource_id {
                return Err(LockError::StoreUnavailable("delete timed out".to_string()));
            }
            self.inner.delete_if_version(key, version).await
        }

        async fn list_for_resource(&self, resource_id: &str) -> LockResult<Vec<VersionedLock>> {
            self.inner.list_for_resource(resource_id).await
        }

        async fn list_all(&self) -> LockResult<Vec<VersionedLock>> {
            self.inner.list_all().await
        }
    }

    #[tokio::test]
    async fn test_failed_record_does_not_stop_the_pass() {
        let store = Arc::new(FailingDeletes {
            inner: InMemoryLeaseStore::new(),
            resource_id: "r1",
        });
        let manager = LockManager::new(
            store.clone(),
            Arc::new(InMemoryAuditLog::new()),
            LockConfig::default(),
        );
        for resource in ["r1", "r2", "r3"] {
            let lock = manager
                .acquire(resource, "ann", LockTier::Edit, None, "")
                .await
                .unwrap();
            manager.release(lock.id, "ann").await.unwrap();
        }

        let report = manager.sweeper().sweep_once().await.unwrap();

        assert_eq!(report, SweepReport { expired: 0, purged: 2, failed: 1 });
        let left = store.list_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].lock.resource_id, "r1");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness();
        h.manager
            .acquire("r1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(120));

        let cancel = CancellationToken::new();
        let handle = h.sweeper.clone().spawn(cancel.clone());

        // The first tick fires immediately.
        for _ in 0..100 {
            if !h.events.events_by_type("lock_expired").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(h.events.events_by_type("lock_expired").len(), 1);
    }
}
