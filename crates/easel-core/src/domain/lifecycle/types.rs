//! Resource and lifecycle error types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::locking::{LockError, LockTier};

/// Result type for lifecycle operations
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// Lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    /// Another holder has a live exclusive lock
    #[error("Resource '{resource_id}' is locked by {holder_id} at {tier} tier until {expires_at}")]
    Locked {
        resource_id: String,
        holder_id: String,
        tier: LockTier,
        expires_at: DateTime<Utc>,
    },

    /// Operation needs an archived resource
    #[error("Resource '{resource_id}' is not archived; archive it first")]
    NotArchived { resource_id: String },

    /// Delete policy refused the actor
    #[error("{actor_id} is not authorized to permanently delete '{resource_id}'")]
    NotAuthorized {
        actor_id: String,
        resource_id: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Transition not allowed from the current state
    #[error("Cannot move resource from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid lifecycle request: {0}")]
    InvalidRequest(String),

    /// Resource store could not be reached; outcome is unknown
    #[error("Resource store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Resource record corrupted: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl LifecycleError {
    /// Get error code for this lifecycle error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Locked { .. } => "E400",
            Self::NotArchived { .. } => "E401",
            Self::NotAuthorized { .. } => "E402",
            Self::NotFound(_) => "E403",
            Self::InvalidTransition { .. } => "E404",
            Self::AlreadyExists(_) => "E405",
            Self::InvalidRequest(_) => "E406",
            Self::StoreUnavailable(_) => "E407",
            Self::Corrupted(_) => "E408",
            Self::Lock(e) => e.code(),
        }
    }
}

impl From<sqlx::Error> for LifecycleError {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

/// Where a resource is in its lifecycle
///
/// `Active -> Archived -> Deleted`, with `Archived -> Active` as the only way
/// back. Deleted is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl LifecycleState {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Whether moving to `to` is a legal transition
    pub fn can_transition_to(&self, to: LifecycleState) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Archived)
                | (Self::Archived, Self::Active)
                | (Self::Archived, Self::Deleted)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A shared, lockable resource
///
/// Only the lifecycle metadata is modeled; the payload belongs to whoever
/// registered the resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub title: String,
    pub lifecycle_state: LifecycleState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<String>,
}

impl Resource {
    /// Create a new active resource
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            lifecycle_state: LifecycleState::Active,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            archived_by: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle_state == LifecycleState::Active
    }

    pub fn is_archived(&self) -> bool {
        self.lifecycle_state == LifecycleState::Archived
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle_state == LifecycleState::Deleted
    }

    /// Apply a transition to this in-memory copy
    ///
    /// Archive markers are set on archive and cleared on restore.
    pub fn apply_transition(&mut self, to: LifecycleState, actor_id: &str, now: DateTime<Utc>) {
        match to {
            LifecycleState::Archived => {
                self.archived_at = Some(now);
                self.archived_by = Some(actor_id.to_string());
            }
            LifecycleState::Active => {
                self.archived_at = None;
                self.archived_by = None;
            }
            LifecycleState::Deleted => {}
        }
        self.lifecycle_state = to;
        self.updated_at = now;
    }
}
