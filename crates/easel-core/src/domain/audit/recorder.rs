//! Audit recorder trait and in-memory log

use async_trait::async_trait;
use std::sync::RwLock;

use super::entry::{AuditAction, AuditEntry};
use crate::error::Result;

/// Append-only sink for audit entries
///
/// Entries are never updated or deleted.
#[async_trait]
pub trait AuditRecorder: Send + Sync + std::fmt::Debug {
    /// Append an entry
    async fn record(&self, entry: &AuditEntry) -> Result<()>;

    /// Entries for a resource in chronological order
    ///
    /// With a limit, only the most recent `limit` entries are returned.
    async fn entries_for(&self, resource_id: &str, limit: Option<usize>)
        -> Result<Vec<AuditEntry>>;

    /// Total number of entries
    async fn count(&self) -> Result<u64>;
}

/// Audit log kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry
    pub fn all(&self) -> Vec<AuditEntry> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Entries recording `action`
    pub fn by_action(&self, action: AuditAction) -> Vec<AuditEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditRecorder for InMemoryAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }

    async fn entries_for(
        &self,
        resource_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let matching: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect();

        Ok(match limit {
            Some(n) if n < matching.len() => matching[matching.len() - n..].to_vec(),
            _ => matching,
        })
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().unwrap_or_else(|e| e.into_inner()).len() as u64)
    }
}
