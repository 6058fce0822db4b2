//! Audit entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::locking::{Lock, LockTier};

/// Operation an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Acquire,
    Refresh,
    Release,
    Override,
    Expire,
    Register,
    Archive,
    Restore,
    PermanentDelete,
}

impl AuditAction {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Refresh => "refresh",
            Self::Release => "release",
            Self::Override => "override",
            Self::Expire => "expire",
            Self::Register => "register",
            Self::Archive => "archive",
            Self::Restore => "restore",
            Self::PermanentDelete => "permanent_delete",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "acquire" => Some(Self::Acquire),
            "refresh" => Some(Self::Refresh),
            "release" => Some(Self::Release),
            "override" => Some(Self::Override),
            "expire" => Some(Self::Expire),
            "register" => Some(Self::Register),
            "archive" => Some(Self::Archive),
            "restore" => Some(Self::Restore),
            "permanent_delete" => Some(Self::PermanentDelete),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What came of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Acquired,
    Refreshed,
    Released,
    AlreadyReleased,
    Conflict,
    Overridden,
    Expired,
    Registered,
    Archived,
    Restored,
    Deleted,
    /// Refused by a validation or policy rule
    Rejected,
    /// The store could not confirm whether the write happened
    Unknown,
}

impl AuditOutcome {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Refreshed => "refreshed",
            Self::Released => "released",
            Self::AlreadyReleased => "already_released",
            Self::Conflict => "conflict",
            Self::Overridden => "overridden",
            Self::Expired => "expired",
            Self::Registered => "registered",
            Self::Archived => "archived",
            Self::Restored => "restored",
            Self::Deleted => "deleted",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "acquired" => Some(Self::Acquired),
            "refreshed" => Some(Self::Refreshed),
            "released" => Some(Self::Released),
            "already_released" => Some(Self::AlreadyReleased),
            "conflict" => Some(Self::Conflict),
            "overridden" => Some(Self::Overridden),
            "expired" => Some(Self::Expired),
            "registered" => Some(Self::Registered),
            "archived" => Some(Self::Archived),
            "restored" => Some(Self::Restored),
            "deleted" => Some(Self::Deleted),
            "rejected" => Some(Self::Rejected),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether the operation changed state
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Self::Conflict | Self::Rejected | Self::Unknown | Self::AlreadyReleased
        )
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of one lock or lifecycle operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub resource_id: String,
    pub actor_id: String,
    pub action: AuditAction,
    pub tier: Option<LockTier>,
    pub lock_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    /// Override justification or failure description
    pub reason: Option<String>,
    pub outcome: AuditOutcome,
    /// Extra operation fields (previous holder, ttl, ...)
    pub detail: Option<serde_json::Value>,
}

impl AuditEntry {
    /// Create a new entry
    pub fn new(
        resource_id: impl Into<String>,
        actor_id: impl Into<String>,
        action: AuditAction,
        outcome: AuditOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: resource_id.into(),
            actor_id: actor_id.into(),
            action,
            tier: None,
            lock_id: None,
            timestamp,
            reason: None,
            outcome,
            detail: None,
        }
    }

    pub fn with_tier(mut self, tier: LockTier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Attach the lock's id and tier
    pub fn with_lock(mut self, lock: &Lock) -> Self {
        self.lock_id = Some(lock.id);
        self.tier = Some(lock.tier);
        self
    }

    pub fn with_lock_id(mut self, lock_id: Uuid) -> Self {
        self.lock_id = Some(lock_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
