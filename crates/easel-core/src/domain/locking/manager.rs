//! Lock manager for coordinating resource leases
//!
//! The lock manager is the single entry point for lease changes. It handles:
//! - Exclusive Edit/System/Emergency leases and shared View leases
//! - Lazy expiry evaluated against the injected clock
//! - Tiered override with a mandatory justification
//! - Audit and event emission for every mutation
//!
//! There is no in-process mutex. Every decision is a fresh read followed by a
//! compare-and-swap, so any number of manager instances can share one store.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::event::LockEvent;
use super::gate::ResourceGate;
use super::store::{bounded, CasOutcome, InMemoryLeaseStore, LeaseStore, VersionedLock};
use super::sweeper::ExpirySweeper;
use super::types::{
    LeaseKey, Lock, LockConfig, LockError, LockResult, LockStatus, LockTier, ReleaseOutcome,
};
use crate::domain::audit::{
    AuditAction, AuditEntry, AuditOutcome, AuditRecorder, InMemoryAuditLog,
};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::events::{EventPublisher, NoopPublisher};

/// How an acquire was satisfied
enum Acquisition {
    /// A new lock was written, possibly over an expired one
    Fresh {
        lock: Lock,
        superseded: Option<Lock>,
    },
    /// The caller already held a live lock; it was renewed
    Reentered(Lock),
}

/// Lock manager for coordinating resource leases
#[derive(Debug, Clone)]
pub struct LockManager {
    store: Arc<dyn LeaseStore>,
    audit: Arc<dyn AuditRecorder>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    gate: Option<Arc<dyn ResourceGate>>,
    config: LockConfig,
}

impl LockManager {
    /// Create a new lock manager over the given store and audit log
    pub fn new(
        store: Arc<dyn LeaseStore>,
        audit: Arc<dyn AuditRecorder>,
        config: LockConfig,
    ) -> Self {
        Self {
            store,
            audit,
            publisher: Arc::new(NoopPublisher),
            clock: Arc::new(SystemClock),
            gate: None,
            config,
        }
    }

    /// Create a lock manager with an in-memory store and audit log
    pub fn in_memory(config: LockConfig) -> Self {
        Self::new(
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(InMemoryAuditLog::new()),
            config,
        )
    }

    /// Send events to `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Evaluate expiry against `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Refuse new leases on resources `gate` reports as gone
    pub fn with_resource_gate(mut self, gate: Arc<dyn ResourceGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Bound every store call made through this manager
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Get the clock used for expiry decisions
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Build an expiry sweeper sharing this manager's store and collaborators
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.audit),
            Arc::clone(&self.publisher),
            Arc::clone(&self.clock),
            self.config.sweep_interval,
        )
        .with_store_timeout(self.config.store_timeout)
        .with_tombstone_retention(self.config.tombstone_retention)
    }

    // ========== Lock operations ==========

    /// Acquire a lock on a resource
    ///
    /// # Arguments
    /// * `resource_id` - The resource to lock
    /// * `holder_id` - Authenticated identity of the caller
    /// * `tier` - Priority class; View never conflicts
    /// * `ttl` - Lease length (None = tier default)
    /// * `purpose` - Free-text description shown to other users
    ///
    /// A holder that already has a live lock gets it renewed instead. A live
    /// lock held by anyone else is a `Conflict`; acquire never overrides.
    pub async fn acquire(
        &self,
        resource_id: &str,
        holder_id: &str,
        tier: LockTier,
        ttl: Option<Duration>,
        purpose: &str,
    ) -> LockResult<Lock> {
        let result = self
            .try_acquire(resource_id, holder_id, tier, ttl, purpose)
            .await;
        let now = self.clock.now();

        match &result {
            Ok(Acquisition::Fresh { lock, superseded }) => {
                info!(
                    resource_id,
                    holder_id,
                    tier = %lock.tier,
                    lock_id = %lock.id,
                    expires_at = %lock.expires_at,
                    "Lock acquired"
                );
                self.record(
                    AuditEntry::new(resource_id, holder_id, AuditAction::Acquire, AuditOutcome::Acquired, now)
                        .with_lock(lock)
                        .with_detail(json!({
                            "expires_at": lock.expires_at,
                            "purpose": lock.purpose,
                            "superseded_holder": superseded.as_ref().map(|l| l.holder_id.as_str()),
                        })),
                )
                .await;
                if let Some(previous) = superseded {
                    self.emit(&LockEvent::expired(previous, holder_id, now)).await;
                }
                self.emit(&LockEvent::acquired(lock, superseded.as_ref(), now))
                    .await;
            }
            Ok(Acquisition::Reentered(lock)) => {
                debug!(resource_id, holder_id, lock_id = %lock.id, "Lock re-acquired by holder, renewed");
                self.record(
                    AuditEntry::new(resource_id, holder_id, AuditAction::Acquire, AuditOutcome::Refreshed, now)
                        .with_lock(lock)
                        .with_detail(json!({ "expires_at": lock.expires_at })),
                )
                .await;
                self.emit(&LockEvent::refreshed(lock, now)).await;
            }
            Err(LockError::Conflict {
                current_holder,
                tier: held_tier,
                expires_at,
                ..
            }) => {
                warn!(
                    resource_id,
                    holder_id,
                    current_holder = %current_holder,
                    held_tier = %held_tier,
                    "Lock conflict"
                );
                self.record(
                    AuditEntry::new(resource_id, holder_id, AuditAction::Acquire, AuditOutcome::Conflict, now)
                        .with_tier(tier)
                        .with_detail(json!({
                            "current_holder": current_holder,
                            "current_tier": held_tier,
                            "expires_at": expires_at,
                        })),
                )
                .await;
                self.emit(&LockEvent::conflict(
                    resource_id,
                    holder_id,
                    tier,
                    current_holder,
                    *held_tier,
                    *expires_at,
                    now,
                ))
                .await;
            }
            Err(e) => {
                warn!(resource_id, holder_id, error = %e, "Lock acquire failed");
                self.record(
                    AuditEntry::new(resource_id, holder_id, AuditAction::Acquire, failure_outcome(e), now)
                        .with_tier(tier)
                        .with_detail(error_detail(e)),
                )
                .await;
            }
        }

        result.map(|acquisition| match acquisition {
            Acquisition::Fresh { lock, .. } | Acquisition::Reentered(lock) => lock,
        })
    }

    async fn try_acquire(
        &self,
        resource_id: &str,
        holder_id: &str,
        tier: LockTier,
        ttl: Option<Duration>,
        purpose: &str,
    ) -> LockResult<Acquisition> {
        validate_id("resource_id", resource_id)?;
        validate_id("holder_id", holder_id)?;
        let ttl = self.config.resolve_ttl(tier, ttl)?;
        self.ensure_lockable(resource_id).await?;
        let key = LeaseKey::for_holder(resource_id, holder_id, tier);

        let attempts = self.attempts();
        for attempt in 1..=attempts {
            let now = self.clock.now();
            let current = self.call("get", self.store.get(&key)).await?;

            let (expected, acquisition) = match current {
                Some(VersionedLock { lock, version }) if lock.is_live_at(now) => {
                    if lock.holder_id != holder_id {
                        return Err(LockError::conflict(&lock));
                    }
                    let mut renewed = lock;
                    renewed.renew(now, ttl);
                    (Some(version), Acquisition::Reentered(renewed))
                }
                Some(VersionedLock { lock, version }) => {
                    // Expired or released: the slot is free, but only for
                    // whoever wins the swap against this exact version.
                    let superseded = lock.active.then_some(lock);
                    let fresh = Lock::new(resource_id, holder_id, tier, now, ttl, purpose);
                    (Some(version), Acquisition::Fresh { lock: fresh, superseded })
                }
                None => {
                    let fresh = Lock::new(resource_id, holder_id, tier, now, ttl, purpose);
                    (None, Acquisition::Fresh { lock: fresh, superseded: None })
                }
            };

            let candidate = match &acquisition {
                Acquisition::Fresh { lock, .. } | Acquisition::Reentered(lock) => lock,
            };
            match self
                .call("compare_and_swap", self.store.compare_and_swap(expected, candidate))
                .await?
            {
                CasOutcome::Written { version } => {
                    self.recheck_lockable(candidate, version).await?;
                    return Ok(acquisition);
                }
                CasOutcome::VersionMismatch => {
                    debug!(resource_id, holder_id, attempt, "Lost lease race, re-reading");
                }
            }
        }

        Err(LockError::Contended {
            resource_id: resource_id.to_string(),
            attempts,
        })
    }

    /// Extend a lock the caller holds to `now + ttl`
    ///
    /// Tier and purpose are preserved. A lock that has already expired is
    /// never revived.
    pub async fn refresh(
        &self,
        lock_id: Uuid,
        holder_id: &str,
        ttl: Option<Duration>,
    ) -> LockResult<Lock> {
        let mut seen = None;
        let result = self.try_refresh(lock_id, holder_id, ttl, &mut seen).await;
        let now = self.clock.now();

        match &result {
            Ok(lock) => {
                debug!(
                    resource_id = %lock.resource_id,
                    holder_id,
                    %lock_id,
                    expires_at = %lock.expires_at,
                    "Lock refreshed"
                );
                self.record(
                    AuditEntry::new(&lock.resource_id, holder_id, AuditAction::Refresh, AuditOutcome::Refreshed, now)
                        .with_lock(lock)
                        .with_detail(json!({
                            "expires_at": lock.expires_at,
                            "renewal_count": lock.renewal_count,
                        })),
                )
                .await;
                self.emit(&LockEvent::refreshed(lock, now)).await;
            }
            Err(e) => {
                warn!(%lock_id, holder_id, error = %e, "Lock refresh refused");
                self.record(failure_entry(&seen, lock_id, holder_id, AuditAction::Refresh, e, now))
                    .await;
            }
        }

        result
    }

    async fn try_refresh(
        &self,
        lock_id: Uuid,
        holder_id: &str,
        ttl: Option<Duration>,
        seen: &mut Option<Lock>,
    ) -> LockResult<Lock> {
        let not_owner = || LockError::NotOwner {
            lock_id,
            holder_id: holder_id.to_string(),
        };

        let attempts = self.attempts();
        for attempt in 1..=attempts {
            let now = self.clock.now();
            let Some(VersionedLock { lock, version }) = self
                .call("find_by_lock_id", self.store.find_by_lock_id(lock_id))
                .await?
            else {
                return Err(not_owner());
            };
            *seen = Some(lock.clone());

            if lock.holder_id != holder_id || lock.is_released() {
                return Err(not_owner());
            }
            // Inactive but never released means the sweeper retired it
            if !lock.active || lock.is_expired_at(now) {
                return Err(LockError::Expired {
                    lock_id,
                    expired_at: lock.expires_at,
                });
            }

            let ttl = self.config.resolve_ttl(lock.tier, ttl)?;
            let mut renewed = lock;
            renewed.renew(now, ttl);

            match self
                .call("compare_and_swap", self.store.compare_and_swap(Some(version), &renewed))
                .await?
            {
                CasOutcome::Written { .. } => return Ok(renewed),
                CasOutcome::VersionMismatch => {
                    debug!(%lock_id, attempt, "Lease changed during refresh, re-reading");
                }
            }
        }

        Err(LockError::Contended {
            resource_id: seen.as_ref().map(|l| l.resource_id.clone()).unwrap_or_default(),
            attempts,
        })
    }

    /// Release a lock the caller holds
    ///
    /// Releasing a lock that is already released, expired or superseded is a
    /// successful no-op and never touches a newer lock on the resource.
    pub async fn release(&self, lock_id: Uuid, holder_id: &str) -> LockResult<ReleaseOutcome> {
        let mut seen = None;
        let result = self.try_release(lock_id, holder_id, &mut seen).await;
        let now = self.clock.now();

        match &result {
            Ok(ReleaseOutcome::Released(lock)) => {
                info!(resource_id = %lock.resource_id, holder_id, %lock_id, "Lock released");
                self.record(
                    AuditEntry::new(&lock.resource_id, holder_id, AuditAction::Release, AuditOutcome::Released, now)
                        .with_lock(lock),
                )
                .await;
                self.emit(&LockEvent::released(lock, now)).await;
            }
            Ok(ReleaseOutcome::AlreadyReleased) => {
                debug!(%lock_id, holder_id, "Lock already released");
                let resource_id = seen.as_ref().map(|l| l.resource_id.as_str()).unwrap_or_default();
                let mut entry = AuditEntry::new(
                    resource_id,
                    holder_id,
                    AuditAction::Release,
                    AuditOutcome::AlreadyReleased,
                    now,
                )
                .with_lock_id(lock_id);
                if let Some(lock) = &seen {
                    entry = entry.with_tier(lock.tier);
                }
                self.record(entry).await;
            }
            Err(e) => {
                warn!(%lock_id, holder_id, error = %e, "Lock release refused");
                self.record(failure_entry(&seen, lock_id, holder_id, AuditAction::Release, e, now))
                    .await;
            }
        }

        result
    }

    async fn try_release(
        &self,
        lock_id: Uuid,
        holder_id: &str,
        seen: &mut Option<Lock>,
    ) -> LockResult<ReleaseOutcome> {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            let now = self.clock.now();
            let Some(VersionedLock { lock, version }) = self
                .call("find_by_lock_id", self.store.find_by_lock_id(lock_id))
                .await?
            else {
                return Ok(ReleaseOutcome::AlreadyReleased);
            };
            *seen = Some(lock.clone());

            if !lock.is_live_at(now) {
                return Ok(ReleaseOutcome::AlreadyReleased);
            }
            if lock.holder_id != holder_id {
                return Err(LockError::NotOwner {
                    lock_id,
                    holder_id: holder_id.to_string(),
                });
            }

            let mut released = lock;
            released.release(now);

            match self
                .call("compare_and_swap", self.store.compare_and_swap(Some(version), &released))
                .await?
            {
                CasOutcome::Written { .. } => return Ok(ReleaseOutcome::Released(released)),
                CasOutcome::VersionMismatch => {
                    debug!(%lock_id, attempt, "Lease changed during release, re-reading");
                }
            }
        }

        Err(LockError::Contended {
            resource_id: seen.as_ref().map(|l| l.resource_id.clone()).unwrap_or_default(),
            attempts,
        })
    }

    /// Take the exclusive lease by force
    ///
    /// `tier` must exceed a live incumbent by at least the configured tier
    /// gap. The new lock gets the tier's default TTL and carries `reason` as
    /// its purpose.
    pub async fn override_lock(
        &self,
        resource_id: &str,
        actor_id: &str,
        tier: LockTier,
        reason: &str,
    ) -> LockResult<Lock> {
        let result = self.try_override(resource_id, actor_id, tier, reason).await;
        let now = self.clock.now();
        let reason = reason.trim();

        match &result {
            Ok((lock, previous)) => {
                warn!(
                    resource_id,
                    actor_id,
                    tier = %tier,
                    previous_holder = previous.as_ref().map(|l| l.holder_id.as_str()).unwrap_or("-"),
                    reason,
                    "Lock overridden"
                );
                self.record(
                    AuditEntry::new(resource_id, actor_id, AuditAction::Override, AuditOutcome::Overridden, now)
                        .with_lock(lock)
                        .with_reason(reason)
                        .with_detail(json!({
                            "previous_holder": previous.as_ref().map(|l| l.holder_id.as_str()),
                            "previous_tier": previous.as_ref().map(|l| l.tier),
                            "previous_lock_id": previous.as_ref().map(|l| l.id),
                        })),
                )
                .await;
                self.emit(&LockEvent::overridden(lock, previous.as_ref(), reason, now))
                    .await;
            }
            Err(e) => {
                warn!(resource_id, actor_id, tier = %tier, error = %e, "Lock override refused");
                let mut entry = AuditEntry::new(
                    resource_id,
                    actor_id,
                    AuditAction::Override,
                    failure_outcome(e),
                    now,
                )
                .with_tier(tier)
                .with_detail(error_detail(e));
                if !reason.is_empty() {
                    entry = entry.with_reason(reason);
                }
                self.record(entry).await;
            }
        }

        result.map(|(lock, _)| lock)
    }

    async fn try_override(
        &self,
        resource_id: &str,
        actor_id: &str,
        tier: LockTier,
        reason: &str,
    ) -> LockResult<(Lock, Option<Lock>)> {
        validate_id("resource_id", resource_id)?;
        validate_id("actor_id", actor_id)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LockError::MissingReason);
        }

        self.ensure_lockable(resource_id).await?;
        let key = LeaseKey::exclusive(resource_id);
        let ttl = self.config.ttl_for(tier);

        let attempts = self.attempts();
        for attempt in 1..=attempts {
            let now = self.clock.now();
            let current = self.call("get", self.store.get(&key)).await?;
            let (expected, incumbent) = match current {
                Some(VersionedLock { lock, version }) => {
                    (Some(version), lock.is_live_at(now).then_some(lock))
                }
                None => (None, None),
            };

            let incumbent_tier = incumbent.as_ref().map(|l| l.tier);
            if !tier.is_exclusive() {
                return Err(LockError::InsufficientTier {
                    requested: tier,
                    incumbent: incumbent_tier,
                });
            }
            if let Some(held) = incumbent_tier {
                let gap = i16::from(tier.rank()) - i16::from(held.rank());
                if gap < i16::from(self.config.min_override_tier_gap) {
                    return Err(LockError::InsufficientTier {
                        requested: tier,
                        incumbent: Some(held),
                    });
                }
            }

            let lock = Lock::new(resource_id, actor_id, tier, now, ttl, reason);
            match self
                .call("compare_and_swap", self.store.compare_and_swap(expected, &lock))
                .await?
            {
                CasOutcome::Written { version } => {
                    self.recheck_lockable(&lock, version).await?;
                    return Ok((lock, incumbent));
                }
                CasOutcome::VersionMismatch => {
                    debug!(resource_id, actor_id, attempt, "Lease changed during override, re-reading");
                }
            }
        }

        Err(LockError::Contended {
            resource_id: resource_id.to_string(),
            attempts,
        })
    }

    /// Current lock status of a resource
    ///
    /// Read-only and not audited. Expired leases are reported as free.
    pub async fn status(&self, resource_id: &str) -> LockResult<LockStatus> {
        let now = self.clock.now();
        let records = self
            .call("list_for_resource", self.store.list_for_resource(resource_id))
            .await?;

        let mut viewers: Vec<String> = records
            .iter()
            .filter(|r| !r.lock.tier.is_exclusive() && r.lock.is_live_at(now))
            .map(|r| r.lock.holder_id.clone())
            .collect();
        viewers.sort();

        let status = match records
            .iter()
            .find(|r| r.lock.tier.is_exclusive() && r.lock.is_live_at(now))
        {
            Some(record) => LockStatus::held_by(&record.lock, viewers),
            None => LockStatus::free(resource_id, viewers),
        };

        debug!(resource_id, held = status.held, "Lock status");
        Ok(status)
    }

    /// All logically active leases, soonest expiry first
    pub async fn active_locks(&self) -> LockResult<Vec<Lock>> {
        let now = self.clock.now();
        let mut locks: Vec<Lock> = self
            .call("list_all", self.store.list_all())
            .await?
            .into_iter()
            .filter(|r| r.lock.is_live_at(now))
            .map(|r| r.lock)
            .collect();
        locks.sort_by_key(|l| l.expires_at);
        Ok(locks)
    }

    // ========== Lifecycle support ==========

    /// The live exclusive lock on a resource, if any
    pub async fn exclusive_lock(&self, resource_id: &str) -> LockResult<Option<Lock>> {
        let now = self.clock.now();
        let current = self
            .call("get", self.store.get(&LeaseKey::exclusive(resource_id)))
            .await?;
        Ok(current
            .map(|r| r.lock)
            .filter(|lock| lock.is_live_at(now)))
    }

    /// Release every live lease `holder_id` has on a resource
    ///
    /// Not audited here: the caller folds the returned locks into its own
    /// audit entry. `lock_released` events are still published.
    pub async fn release_held_by(&self, resource_id: &str, holder_id: &str) -> LockResult<Vec<Lock>> {
        let now = self.clock.now();
        let held: Vec<Lock> = self
            .call("list_for_resource", self.store.list_for_resource(resource_id))
            .await?
            .into_iter()
            .filter(|r| r.lock.holder_id == holder_id && r.lock.is_live_at(now))
            .map(|r| r.lock)
            .collect();

        let mut released = Vec::with_capacity(held.len());
        for lock in held {
            let mut seen = None;
            if let ReleaseOutcome::Released(lock) =
                self.try_release(lock.id, holder_id, &mut seen).await?
            {
                info!(resource_id, holder_id, lock_id = %lock.id, "Lock released");
                self.emit(&LockEvent::released(&lock, self.clock.now())).await;
                released.push(lock);
            }
        }
        Ok(released)
    }

    /// Remove every lease record for a resource
    ///
    /// Used once the resource is gone. Records rewritten during the purge are
    /// picked up on the next pass.
    pub async fn purge_resource(&self, resource_id: &str) -> LockResult<usize> {
        let mut purged = 0;
        for _ in 0..self.attempts() {
            let records = self
                .call("list_for_resource", self.store.list_for_resource(resource_id))
                .await?;
            if records.is_empty() {
                break;
            }
            for record in records {
                let key = record.lock.lease_key();
                if self
                    .call("delete_if_version", self.store.delete_if_version(&key, record.version))
                    .await?
                {
                    purged += 1;
                }
            }
        }

        debug!(resource_id, purged, "Purged lease records");
        Ok(purged)
    }

    // ========== Internals ==========

    async fn ensure_lockable(&self, resource_id: &str) -> LockResult<()> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        if self.call("is_lockable", gate.is_lockable(resource_id)).await? {
            Ok(())
        } else {
            Err(LockError::ResourceNotFound(resource_id.to_string()))
        }
    }

    /// Check the gate again after a write
    ///
    /// A delete that lands between the first check and the write has already
    /// purged the resource's leases, so the fresh record is removed here.
    async fn recheck_lockable(&self, lock: &Lock, version: u64) -> LockResult<()> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        if self.call("is_lockable", gate.is_lockable(&lock.resource_id)).await? {
            return Ok(());
        }

        self.call(
            "delete_if_version",
            self.store.delete_if_version(&lock.lease_key(), version),
        )
        .await?;
        Err(LockError::ResourceNotFound(lock.resource_id.clone()))
    }

    fn attempts(&self) -> u32 {
        self.config.max_cas_attempts.max(1)
    }

    async fn call<T>(
        &self,
        op: &str,
        fut: impl Future<Output = LockResult<T>>,
    ) -> LockResult<T> {
        bounded(self.config.store_timeout, op, fut).await
    }

    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(&entry).await {
            error!(
                resource_id = %entry.resource_id,
                action = %entry.action,
                outcome = %entry.outcome,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }

    async fn emit(&self, event: &LockEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(
                resource_id = %event.resource_id,
                event_type = %event.event_type,
                error = %e,
                "Failed to publish lock event"
            );
        }
    }
}

fn validate_id(field: &str, value: &str) -> LockResult<()> {
    if value.trim().is_empty() {
        return Err(LockError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn failure_outcome(err: &LockError) -> AuditOutcome {
    match err {
        LockError::Conflict { .. } | LockError::Contended { .. } => AuditOutcome::Conflict,
        LockError::StoreUnavailable(_) => AuditOutcome::Unknown,
        _ => AuditOutcome::Rejected,
    }
}

fn error_detail(err: &LockError) -> serde_json::Value {
    json!({ "code": err.code(), "error": err.to_string() })
}

/// Audit entry for a refused refresh or release
///
/// The resource is only known when the lock record was found.
fn failure_entry(
    seen: &Option<Lock>,
    lock_id: Uuid,
    holder_id: &str,
    action: AuditAction,
    err: &LockError,
    now: chrono::DateTime<chrono::Utc>,
) -> AuditEntry {
    let resource_id = seen.as_ref().map(|l| l.resource_id.as_str()).unwrap_or_default();
    let mut entry = AuditEntry::new(resource_id, holder_id, action, failure_outcome(err), now)
        .with_lock_id(lock_id)
        .with_detail(error_detail(err));
    if let Some(lock) = seen {
        entry = entry.with_tier(lock.tier);
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::events::InMemoryEventStore;
    use async_trait::async_trait;

    struct Harness {
        manager: LockManager,
        clock: Arc<ManualClock>,
        audit: Arc<InMemoryAuditLog>,
        events: Arc<InMemoryEventStore>,
    }

    fn harness_with(config: LockConfig) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(InMemoryAuditLog::new());
        let events = Arc::new(InMemoryEventStore::new());
        let manager = LockManager::new(Arc::new(InMemoryLeaseStore::new()), audit.clone(), config)
            .with_clock(clock.clone())
            .with_publisher(events.clone());

        Harness {
            manager,
            clock,
            audit,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(LockConfig::default())
    }

    #[tokio::test]
    async fn test_acquire_free_resource() {
        let h = harness();

        let lock = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "layout")
            .await
            .unwrap();

        assert_eq!(lock.holder_id, "ann");
        assert_eq!(lock.tier, LockTier::Edit);
        assert_eq!(lock.expires_at, lock.acquired_at + chrono::Duration::seconds(300));
        assert_eq!(h.events.events_by_type("lock_acquired").len(), 1);

        let entries = h.audit.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Acquired);
        assert_eq!(entries[0].lock_id, Some(lock.id));
    }

    #[tokio::test]
    async fn test_foreign_holder_conflicts() {
        let h = harness();
        let held = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();

        let err = h
            .manager
            .acquire("canvas-1", "bob", LockTier::Emergency, None, "")
            .await
            .unwrap_err();

        match err {
            LockError::Conflict {
                current_holder,
                tier,
                expires_at,
                ..
            } => {
                assert_eq!(current_holder, "ann");
                assert_eq!(tier, LockTier::Edit);
                assert_eq!(expires_at, held.expires_at);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(h.events.events_by_type("lock_conflict").len(), 1);
        assert_eq!(h.audit.all()[1].outcome, AuditOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_same_holder_reacquire_renews() {
        let h = harness();
        let first = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "layout")
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(100));
        let second = h
            .manager
            .acquire("canvas-1", "ann", LockTier::System, Some(Duration::from_secs(60)), "other")
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.tier, LockTier::Edit);
        assert_eq!(second.purpose, "layout");
        assert_eq!(second.renewal_count, 1);
        assert_eq!(second.expires_at, h.clock.now() + chrono::Duration::seconds(60));
        assert_eq!(h.audit.all()[1].outcome, AuditOutcome::Refreshed);
    }

    #[tokio::test]
    async fn test_view_never_conflicts() {
        let h = harness();
        h.manager
            .acquire("canvas-1", "bob", LockTier::View, None, "")
            .await
            .unwrap();
        h.manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();
        h.manager
            .acquire("canvas-1", "cy", LockTier::View, None, "")
            .await
            .unwrap();

        let status = h.manager.status("canvas-1").await.unwrap();
        assert!(status.held);
        assert_eq!(status.holder_id.as_deref(), Some("ann"));
        assert_eq!(status.viewers, vec!["bob".to_string(), "cy".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_ttl_rejected_and_audited() {
        let h = harness();

        let err = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, Some(Duration::from_secs(1)), "")
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::InvalidTtl { ttl_secs: 1, .. }));
        assert_eq!(h.audit.all()[0].outcome, AuditOutcome::Rejected);
        assert!(!h.manager.status("canvas-1").await.unwrap().held);
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_rejected_not_panicking() {
        let huge = Duration::from_secs(10_000_000_000_000);
        let h = harness_with(LockConfig::default().with_ttl_bounds(Duration::from_secs(30), huge));

        let err = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, Some(huge), "")
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidTtl { .. }));

        let lock = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();
        let err = h.manager.refresh(lock.id, "ann", Some(huge)).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidTtl { .. }));
    }

    #[tokio::test]
    async fn test_empty_ids_rejected() {
        let h = harness();
        let err = h
            .manager
            .acquire("  ", "ann", LockTier::Edit, None, "")
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_lazy_expiry_frees_resource() {
        let h = harness();
        h.manager
            .acquire("canvas-1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(61));
        assert!(!h.manager.status("canvas-1").await.unwrap().held);

        let lock = h
            .manager
            .acquire("canvas-1", "bob", LockTier::Edit, None, "")
            .await
            .unwrap();
        assert_eq!(lock.holder_id, "bob");
        assert_eq!(h.events.events_by_type("lock_expired").len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_extends_lease() {
        let h = harness();
        let lock = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(50));
        let refreshed = h
            .manager
            .refresh(lock.id, "ann", Some(Duration::from_secs(120)))
            .await
            .unwrap();

        assert_eq!(refreshed.id, lock.id);
        assert_eq!(refreshed.renewal_count, 1);
        assert_eq!(refreshed.expires_at, h.clock.now() + chrono::Duration::seconds(120));
    }

    #[tokio::test]
    async fn test_refresh_by_other_holder_is_not_owner() {
        let h = harness();
        let lock = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();

        let err = h.manager.refresh(lock.id, "bob", None).await.unwrap_err();
        assert!(matches!(err, LockError::NotOwner { .. }));

        let unknown = h.manager.refresh(Uuid::new_v4(), "ann", None).await.unwrap_err();
        assert!(matches!(unknown, LockError::NotOwner { .. }));

        let entries = h.audit.all();
        assert_eq!(entries[1].resource_id, "canvas-1");
        assert_eq!(entries[2].resource_id, "");
        assert_eq!(entries[2].outcome, AuditOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_refresh_after_expiry_fails() {
        let h = harness();
        let lock = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(61));
        let err = h.manager.refresh(lock.id, "ann", None).await.unwrap_err();

        assert_eq!(
            err,
            LockError::Expired {
                lock_id: lock.id,
                expired_at: lock.expires_at
            }
        );
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let h = harness();
        let lock = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();

        let first = h.manager.release(lock.id, "ann").await.unwrap();
        let second = h.manager.release(lock.id, "ann").await.unwrap();

        assert!(first.changed());
        assert_eq!(second, ReleaseOutcome::AlreadyReleased);
        assert!(!h.manager.status("canvas-1").await.unwrap().held);
        assert_eq!(h.events.events_by_type("lock_released").len(), 1);
        assert_eq!(h.audit.by_action(AuditAction::Release).len(), 2);
    }

    #[tokio::test]
    async fn test_release_by_other_holder_is_refused() {
        let h = harness();
        let lock = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();

        let err = h.manager.release(lock.id, "bob").await.unwrap_err();
        assert!(matches!(err, LockError::NotOwner { .. }));
        assert!(h.manager.status("canvas-1").await.unwrap().held);
    }

    #[tokio::test]
    async fn test_stale_release_does_not_touch_newer_lock() {
        let h = harness();
        let old = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(61));
        let newer = h
            .manager
            .acquire("canvas-1", "bob", LockTier::Edit, None, "")
            .await
            .unwrap();

        let outcome = h.manager.release(old.id, "ann").await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::AlreadyReleased);
        let status = h.manager.status("canvas-1").await.unwrap();
        assert_eq!(status.lock_id, Some(newer.id));
    }

    #[tokio::test]
    async fn test_override_requires_reason() {
        let h = harness();
        let err = h
            .manager
            .override_lock("canvas-1", "ops", LockTier::Emergency, "   ")
            .await
            .unwrap_err();
        assert_eq!(err, LockError::MissingReason);
        assert_eq!(h.audit.all()[0].outcome, AuditOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_override_tier_rules() {
        let h = harness();
        h.manager
            .acquire("canvas-1", "ann", LockTier::System, None, "")
            .await
            .unwrap();

        let same = h
            .manager
            .override_lock("canvas-1", "bob", LockTier::System, "need it")
            .await
            .unwrap_err();
        assert_eq!(
            same,
            LockError::InsufficientTier {
                requested: LockTier::System,
                incumbent: Some(LockTier::System)
            }
        );

        let view = h
            .manager
            .override_lock("canvas-1", "bob", LockTier::View, "look")
            .await
            .unwrap_err();
        assert!(matches!(view, LockError::InsufficientTier { requested: LockTier::View, .. }));

        let lock = h
            .manager
            .override_lock("canvas-1", "ops", LockTier::Emergency, " outage ")
            .await
            .unwrap();
        assert_eq!(lock.holder_id, "ops");
        assert_eq!(lock.purpose, "outage");
        assert_eq!(lock.expires_at, lock.acquired_at + chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_override_gap_is_configurable() {
        let h = harness_with(LockConfig::default().with_override_gap(2));
        h.manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();

        assert!(h
            .manager
            .override_lock("canvas-1", "svc", LockTier::System, "reindex")
            .await
            .is_err());
        assert!(h
            .manager
            .override_lock("canvas-1", "ops", LockTier::Emergency, "outage")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_override_free_slot_with_edit() {
        let h = harness();
        let lock = h
            .manager
            .override_lock("canvas-1", "ann", LockTier::Edit, "taking over")
            .await
            .unwrap();
        assert_eq!(lock.tier, LockTier::Edit);

        let entry = &h.audit.by_action(AuditAction::Override)[0];
        assert!(entry.detail.as_ref().unwrap()["previous_holder"].is_null());
    }

    #[tokio::test]
    async fn test_override_records_previous_holder() {
        let h = harness();
        let old = h
            .manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();
        h.manager
            .override_lock("canvas-1", "ops", LockTier::Emergency, "incident")
            .await
            .unwrap();

        let entry = &h.audit.by_action(AuditAction::Override)[0];
        assert_eq!(entry.reason.as_deref(), Some("incident"));
        let detail = entry.detail.as_ref().unwrap();
        assert_eq!(detail["previous_holder"], "ann");
        assert_eq!(detail["previous_tier"], "edit");

        let event = &h.events.events_by_type("lock_overridden")[0];
        assert_eq!(event.data.as_ref().unwrap()["previous_holder"], "ann");

        let err = h.manager.refresh(old.id, "ann", None).await.unwrap_err();
        assert!(matches!(err, LockError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_active_locks_skip_expired_and_released() {
        let h = harness();
        let a = h
            .manager
            .acquire("r1", "ann", LockTier::Edit, Some(Duration::from_secs(60)), "")
            .await
            .unwrap();
        let b = h
            .manager
            .acquire("r2", "bob", LockTier::Edit, None, "")
            .await
            .unwrap();
        let c = h
            .manager
            .acquire("r3", "cy", LockTier::Edit, None, "")
            .await
            .unwrap();
        h.manager.release(c.id, "cy").await.unwrap();
        h.clock.advance(Duration::from_secs(61));

        let active = h.manager.active_locks().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
        assert_ne!(active[0].id, a.id);
    }

    #[tokio::test]
    async fn test_release_held_by_and_purge() {
        let h = harness();
        h.manager
            .acquire("r1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap();
        h.manager
            .acquire("r1", "ann", LockTier::View, None, "")
            .await
            .unwrap();
        h.manager
            .acquire("r1", "bob", LockTier::View, None, "")
            .await
            .unwrap();

        let released = h.manager.release_held_by("r1", "ann").await.unwrap();
        assert_eq!(released.len(), 2);
        assert_eq!(h.manager.status("r1").await.unwrap().viewers, vec!["bob".to_string()]);

        assert_eq!(h.manager.purge_resource("r1").await.unwrap(), 3);
        assert!(h.manager.active_locks().await.unwrap().is_empty());
    }

    /// Gate that reports the resource deleted after `open_checks` calls
    #[derive(Debug)]
    struct ClosingGate {
        open_checks: std::sync::atomic::AtomicUsize,
    }

    impl ClosingGate {
        fn new(open_checks: usize) -> Self {
            Self {
                open_checks: std::sync::atomic::AtomicUsize::new(open_checks),
            }
        }
    }

    #[async_trait]
    impl ResourceGate for ClosingGate {
        async fn is_lockable(&self, _resource_id: &str) -> LockResult<bool> {
            use std::sync::atomic::Ordering;
            Ok(self
                .open_checks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok())
        }
    }

    #[tokio::test]
    async fn test_gate_refuses_deleted_resource() {
        let h = harness_with(LockConfig::default());
        let manager = h.manager.clone().with_resource_gate(Arc::new(ClosingGate::new(0)));

        let err = manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap_err();
        assert_eq!(err, LockError::ResourceNotFound("canvas-1".to_string()));
        assert_eq!(err.code(), "E310");
        assert_eq!(h.audit.all()[0].outcome, AuditOutcome::Rejected);

        let err = manager
            .override_lock("canvas-1", "ops", LockTier::Emergency, "incident")
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::ResourceNotFound(_)));
        assert!(h.manager.active_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lease_written_during_delete_is_removed() {
        let h = harness();
        // Open for the check before the write, closed for the one after
        let manager = h.manager.clone().with_resource_gate(Arc::new(ClosingGate::new(1)));

        let err = manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::ResourceNotFound(_)));
        assert!(h.manager.active_locks().await.unwrap().is_empty());
        assert!(h.events.events_by_type("lock_acquired").is_empty());
    }

    /// Store whose calls never complete in time
    #[derive(Debug)]
    struct StalledStore;

    #[async_trait]
    impl LeaseStore for StalledStore {
        async fn get(&self, _key: &LeaseKey) -> LockResult<Option<VersionedLock>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn find_by_lock_id(&self, _lock_id: Uuid) -> LockResult<Option<VersionedLock>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn compare_and_swap(&self, _expected: Option<u64>, _lock: &Lock) -> LockResult<CasOutcome> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(CasOutcome::VersionMismatch)
        }

        async fn delete_if_version(&self, _key: &LeaseKey, _version: u64) -> LockResult<bool> {
            Ok(false)
        }

        async fn list_for_resource(&self, _resource_id: &str) -> LockResult<Vec<VersionedLock>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn list_all(&self) -> LockResult<Vec<VersionedLock>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_is_unavailable() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let manager = LockManager::new(Arc::new(StalledStore), audit.clone(), LockConfig::default())
            .with_store_timeout(Duration::from_millis(50));

        let err = manager
            .acquire("canvas-1", "ann", LockTier::Edit, None, "")
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::StoreUnavailable(_)));
        assert_eq!(audit.all()[0].outcome, AuditOutcome::Unknown);
        assert!(manager.status("canvas-1").await.is_err());
    }
}
