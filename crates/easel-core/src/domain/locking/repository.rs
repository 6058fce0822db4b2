//! SQLite lease store
//!
//! Compare-and-swap is expressed as conditional SQL: creation is an
//! `INSERT ... ON CONFLICT DO NOTHING`, replacement is an `UPDATE` guarded by
//! the stored version. A write that affects zero rows lost the race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::store::{CasOutcome, LeaseStore, VersionedLock};
use super::types::{LeaseKey, LeaseSlot, Lock, LockError, LockResult, LockTier};

const SELECT_LEASE: &str = r#"
    SELECT resource_id, slot, lock_id, holder_id, tier,
           acquired_at, expires_at, purpose, active, renewal_count, released_at, version
    FROM leases
"#;

/// Lease store persisted in the `leases` table
#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn get(&self, key: &LeaseKey) -> LockResult<Option<VersionedLock>> {
        let row: Option<LeaseRow> =
            sqlx::query_as(&format!("{} WHERE resource_id = ? AND slot = ?", SELECT_LEASE))
                .bind(&key.resource_id)
                .bind(key.slot.as_key())
                .fetch_optional(&self.pool)
                .await?;

        row.map(LeaseRow::into_versioned).transpose()
    }

    async fn find_by_lock_id(&self, lock_id: Uuid) -> LockResult<Option<VersionedLock>> {
        let row: Option<LeaseRow> = sqlx::query_as(&format!("{} WHERE lock_id = ?", SELECT_LEASE))
            .bind(lock_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(LeaseRow::into_versioned).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected: Option<u64>,
        lock: &Lock,
    ) -> LockResult<CasOutcome> {
        let key = lock.lease_key();
        let lock_id = lock.id.to_string();

        // Taking the next version first makes this a write transaction from
        // its first statement, so concurrent writers queue on the busy timeout.
        let mut tx = self.pool.begin().await?;
        let version: i64 = sqlx::query_scalar(
            "UPDATE lease_versions SET value = value + 1 WHERE id = 1 RETURNING value",
        )
        .fetch_one(&mut *tx)
        .await?;

        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO leases (
                        resource_id, slot, lock_id, holder_id, tier,
                        acquired_at, expires_at, purpose, active, renewal_count, released_at,
                        version
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(resource_id, slot) DO NOTHING
                    "#,
                )
                .bind(&key.resource_id)
                .bind(key.slot.as_key())
                .bind(&lock_id)
                .bind(&lock.holder_id)
                .bind(lock.tier.as_str())
                .bind(lock.acquired_at)
                .bind(lock.expires_at)
                .bind(&lock.purpose)
                .bind(lock.active)
                .bind(i64::from(lock.renewal_count))
                .bind(lock.released_at)
                .bind(version)
                .execute(&mut *tx)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE leases SET
                        lock_id = ?,
                        holder_id = ?,
                        tier = ?,
                        acquired_at = ?,
                        expires_at = ?,
                        purpose = ?,
                        active = ?,
                        renewal_count = ?,
                        released_at = ?,
                        version = ?
                    WHERE resource_id = ? AND slot = ? AND version = ?
                    "#,
                )
                .bind(&lock_id)
                .bind(&lock.holder_id)
                .bind(lock.tier.as_str())
                .bind(lock.acquired_at)
                .bind(lock.expires_at)
                .bind(&lock.purpose)
                .bind(lock.active)
                .bind(i64::from(lock.renewal_count))
                .bind(lock.released_at)
                .bind(version)
                .bind(&key.resource_id)
                .bind(key.slot.as_key())
                .bind(to_db_version(expected)?)
                .execute(&mut *tx)
                .await?
            }
        };

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(CasOutcome::VersionMismatch);
        }

        tx.commit().await?;
        let version = u64::try_from(version)
            .map_err(|_| LockError::Corrupted(format!("lease version {} out of range", version)))?;
        Ok(CasOutcome::Written { version })
    }

    async fn delete_if_version(&self, key: &LeaseKey, version: u64) -> LockResult<bool> {
        let result =
            sqlx::query("DELETE FROM leases WHERE resource_id = ? AND slot = ? AND version = ?")
                .bind(&key.resource_id)
                .bind(key.slot.as_key())
                .bind(to_db_version(version)?)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_resource(&self, resource_id: &str) -> LockResult<Vec<VersionedLock>> {
        let rows: Vec<LeaseRow> = sqlx::query_as(&format!(
            "{} WHERE resource_id = ? ORDER BY slot",
            SELECT_LEASE
        ))
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LeaseRow::into_versioned).collect()
    }

    async fn list_all(&self) -> LockResult<Vec<VersionedLock>> {
        let rows: Vec<LeaseRow> =
            sqlx::query_as(&format!("{} ORDER BY expires_at", SELECT_LEASE))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(LeaseRow::into_versioned).collect()
    }
}

fn to_db_version(version: u64) -> LockResult<i64> {
    i64::try_from(version)
        .map_err(|_| LockError::Corrupted(format!("lease version {} out of range", version)))
}

// ========== Database Row Types ==========

#[derive(sqlx::FromRow)]
struct LeaseRow {
    resource_id: String,
    slot: String,
    lock_id: String,
    holder_id: String,
    tier: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    purpose: String,
    active: bool,
    renewal_count: i64,
    released_at: Option<DateTime<Utc>>,
    version: i64,
}

impl LeaseRow {
    fn into_versioned(self) -> LockResult<VersionedLock> {
        let id = Uuid::parse_str(&self.lock_id)
            .map_err(|e| LockError::Corrupted(format!("Invalid lock ID: {}", e)))?;
        let tier: LockTier = self
            .tier
            .parse()
            .map_err(|_| LockError::Corrupted(format!("Invalid tier: {}", self.tier)))?;
        let slot = LeaseSlot::parse(&self.slot)
            .ok_or_else(|| LockError::Corrupted(format!("Invalid lease slot: {}", self.slot)))?;
        if slot.is_view() == tier.is_exclusive() {
            return Err(LockError::Corrupted(format!(
                "Lease slot {} does not match tier {}",
                self.slot, tier
            )));
        }
        let version = u64::try_from(self.version)
            .map_err(|_| LockError::Corrupted(format!("Invalid version: {}", self.version)))?;

        Ok(VersionedLock {
            lock: Lock {
                id,
                resource_id: self.resource_id,
                holder_id: self.holder_id,
                tier,
                acquired_at: self.acquired_at,
                expires_at: self.expires_at,
                purpose: self.purpose,
                active: self.active,
                renewal_count: u32::try_from(self.renewal_count).unwrap_or(u32::MAX),
                released_at: self.released_at,
            },
            version,
        })
    }
}
