//! Lease store abstraction
//!
//! The lease store is the only shared mutable state in the locking domain.
//! It holds one record per lease key with a monotonically increasing
//! version, and every write is a compare-and-swap against that version.
//! There is no business logic here; expiry and ownership rules live in the
//! lock manager.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

use super::types::{LeaseKey, Lock, LockError, LockResult};

/// A lock record together with its store version
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedLock {
    pub lock: Lock,
    pub version: u64,
}

/// Result of a compare-and-swap write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was applied; the record now has `version`
    Written { version: u64 },
    /// The record changed since it was read; nothing was written
    VersionMismatch,
}

impl CasOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Durable mapping of lease key to current lock record
#[async_trait]
pub trait LeaseStore: Send + Sync + std::fmt::Debug {
    /// Read the record at `key`
    async fn get(&self, key: &LeaseKey) -> LockResult<Option<VersionedLock>>;

    /// Find the record currently holding lock `lock_id`
    ///
    /// Returns `None` once the lock has been superseded or purged.
    async fn find_by_lock_id(&self, lock_id: Uuid) -> LockResult<Option<VersionedLock>>;

    /// Write `lock` at its lease key if the stored version matches
    ///
    /// `expected = None` means the key must not exist yet. Versions are never
    /// reused, not even for a key that was deleted and written again.
    async fn compare_and_swap(&self, expected: Option<u64>, lock: &Lock)
        -> LockResult<CasOutcome>;

    /// Remove the record at `key` if its version still matches
    async fn delete_if_version(&self, key: &LeaseKey, version: u64) -> LockResult<bool>;

    /// All records for one resource
    async fn list_for_resource(&self, resource_id: &str) -> LockResult<Vec<VersionedLock>>;

    /// All records in the store
    async fn list_all(&self) -> LockResult<Vec<VersionedLock>>;
}

/// Run one store call, failing with `StoreUnavailable` once `limit` elapses
///
/// A timed-out write may or may not have been applied; callers treat the
/// outcome as unknown and re-read before deciding anything.
pub(crate) async fn bounded<T>(
    limit: Duration,
    op: &str,
    call: impl Future<Output = LockResult<T>>,
) -> LockResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LockError::StoreUnavailable(format!(
            "{} timed out after {}ms",
            op,
            limit.as_millis()
        ))),
    }
}

/// Single-process lease store backed by a map
///
/// Each compare-and-swap runs under the map's write guard, which gives the
/// same per-key atomicity the SQLite store gets from conditional updates.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    records: RwLock<HashMap<LeaseKey, VersionedLock>>,
    last_version: AtomicU64,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<T>(_: T) -> LockError {
        LockError::StoreUnavailable("in-memory lease store poisoned".to_string())
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get(&self, key: &LeaseKey) -> LockResult<Option<VersionedLock>> {
        let records = self.records.read().map_err(Self::poisoned)?;
        Ok(records.get(key).cloned())
    }

    async fn find_by_lock_id(&self, lock_id: Uuid) -> LockResult<Option<VersionedLock>> {
        let records = self.records.read().map_err(Self::poisoned)?;
        Ok(records.values().find(|r| r.lock.id == lock_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected: Option<u64>,
        lock: &Lock,
    ) -> LockResult<CasOutcome> {
        let key = lock.lease_key();
        let mut records = self.records.write().map_err(Self::poisoned)?;

        let current = records.get(&key).map(|r| r.version);
        if current != expected {
            return Ok(CasOutcome::VersionMismatch);
        }

        let version = self.last_version.fetch_add(1, Ordering::Relaxed) + 1;
        records.insert(
            key,
            VersionedLock {
                lock: lock.clone(),
                version,
            },
        );
        Ok(CasOutcome::Written { version })
    }

    async fn delete_if_version(&self, key: &LeaseKey, version: u64) -> LockResult<bool> {
        let mut records = self.records.write().map_err(Self::poisoned)?;
        match records.get(key) {
            Some(r) if r.version == version => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_resource(&self, resource_id: &str) -> LockResult<Vec<VersionedLock>> {
        let records = self.records.read().map_err(Self::poisoned)?;
        Ok(records
            .values()
            .filter(|r| r.lock.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> LockResult<Vec<VersionedLock>> {
        let records = self.records.read().map_err(Self::poisoned)?;
        Ok(records.values().cloned().collect())
    }
}
