//! Audit log persisted in SQLite
//!
//! Rows are only ever inserted. `seq` orders entries written within the same
//! timestamp.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::entry::{AuditAction, AuditEntry, AuditOutcome};
use super::recorder::AuditRecorder;
use crate::domain::locking::LockTier;
use crate::error::{Error, Result};

/// Audit recorder backed by the `audit_log` table
#[derive(Debug, Clone)]
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    /// Create a new audit log with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Count entries for one resource
    pub async fn count_for(&self, resource_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }
}

#[async_trait]
impl AuditRecorder for SqliteAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let detail = entry.detail.as_ref().map(|d| d.to_string());

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, resource_id, actor_id, action, tier, lock_id,
                timestamp, reason, outcome, detail
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.resource_id)
        .bind(&entry.actor_id)
        .bind(entry.action.as_str())
        .bind(entry.tier.map(|t| t.as_str()))
        .bind(entry.lock_id.map(|id| id.to_string()))
        .bind(entry.timestamp)
        .bind(&entry.reason)
        .bind(entry.outcome.as_str())
        .bind(&detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entries_for(
        &self,
        resource_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        let limit = limit
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, resource_id, actor_id, action, tier, lock_id,
                   timestamp, reason, outcome, detail
            FROM audit_log
            WHERE resource_id = ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(resource_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows
            .into_iter()
            .map(AuditRow::into_entry)
            .collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    async fn count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.max(0) as u64)
    }
}

// ========== Database Row Types ==========

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    resource_id: String,
    actor_id: String,
    action: String,
    tier: Option<String>,
    lock_id: Option<String>,
    timestamp: DateTime<Utc>,
    reason: Option<String>,
    outcome: String,
    detail: Option<String>,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Parse(format!("Invalid audit ID: {}", e)))?;
        let action = AuditAction::parse(&self.action)
            .ok_or_else(|| Error::Parse(format!("Invalid audit action: {}", self.action)))?;
        let outcome = AuditOutcome::parse(&self.outcome)
            .ok_or_else(|| Error::Parse(format!("Invalid audit outcome: {}", self.outcome)))?;
        let tier = self
            .tier
            .map(|t| t.parse::<LockTier>())
            .transpose()
            .map_err(|e| Error::Parse(format!("Invalid tier: {}", e)))?;
        let lock_id = self
            .lock_id
            .map(|l| Uuid::parse_str(&l))
            .transpose()
            .map_err(|e| Error::Parse(format!("Invalid lock ID: {}", e)))?;
        let detail = self
            .detail
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| Error::Parse(format!("Invalid audit detail JSON: {}", e)))?;

        Ok(AuditEntry {
            id,
            resource_id: self.resource_id,
            actor_id: self.actor_id,
            action,
            tier,
            lock_id,
            timestamp: self.timestamp,
            reason: self.reason,
            outcome,
            detail,
        })
    }
}
