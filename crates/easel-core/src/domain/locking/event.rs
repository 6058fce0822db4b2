//! Locking domain events
//!
//! Events for tracking lock-related activities. These are the payloads handed
//! to the notification collaborator for fan-out to other viewers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Lock, LockTier};
use crate::domain::events::DomainEvent;

/// Type of lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventType {
    /// A lock was acquired
    LockAcquired,
    /// A lock's lease was extended
    LockRefreshed,
    /// A lock was released by its holder
    LockReleased,
    /// An acquire was refused because someone else holds the lock
    LockConflict,
    /// A lease ran out and was cleaned up
    LockExpired,
    /// A lock was taken over by a higher tier
    LockOverridden,
}

impl LockEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockAcquired => "lock_acquired",
            Self::LockRefreshed => "lock_refreshed",
            Self::LockReleased => "lock_released",
            Self::LockConflict => "lock_conflict",
            Self::LockExpired => "lock_expired",
            Self::LockOverridden => "lock_overridden",
        }
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A locking domain event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// The resource the lock covers
    pub resource_id: String,
    /// Who caused the event
    pub actor_id: String,
    /// Type of event
    pub event_type: LockEventType,
    /// Event data
    pub data: Option<serde_json::Value>,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl LockEvent {
    /// Create a new lock event
    pub fn new(
        resource_id: impl Into<String>,
        actor_id: impl Into<String>,
        event_type: LockEventType,
        data: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: resource_id.into(),
            actor_id: actor_id.into(),
            event_type,
            data,
            created_at: at,
        }
    }

    /// Create a lock acquired event
    pub fn acquired(lock: &Lock, replaced: Option<&Lock>, at: DateTime<Utc>) -> Self {
        let data = serde_json::json!({
            "lock_id": lock.id,
            "tier": lock.tier,
            "expires_at": lock.expires_at,
            "purpose": lock.purpose,
            "replaced_holder": replaced.map(|l| l.holder_id.as_str()),
        });
        Self::new(&lock.resource_id, &lock.holder_id, LockEventType::LockAcquired, Some(data), at)
    }

    /// Create a lock refreshed event
    pub fn refreshed(lock: &Lock, at: DateTime<Utc>) -> Self {
        let data = serde_json::json!({
            "lock_id": lock.id,
            "tier": lock.tier,
            "expires_at": lock.expires_at,
            "renewal_count": lock.renewal_count,
        });
        Self::new(&lock.resource_id, &lock.holder_id, LockEventType::LockRefreshed, Some(data), at)
    }

    /// Create a lock released event
    pub fn released(lock: &Lock, at: DateTime<Utc>) -> Self {
        let held_ms = (at - lock.acquired_at).num_milliseconds().max(0);
        let data = serde_json::json!({
            "lock_id": lock.id,
            "tier": lock.tier,
            "held_ms": held_ms,
        });
        Self::new(&lock.resource_id, &lock.holder_id, LockEventType::LockReleased, Some(data), at)
    }

    /// Create a lock conflict event
    pub fn conflict(
        resource_id: &str,
        requester: &str,
        requested_tier: LockTier,
        current_holder: &str,
        current_tier: LockTier,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        let data = serde_json::json!({
            "requested_tier": requested_tier,
            "current_holder": current_holder,
            "current_tier": current_tier,
            "expires_at": expires_at,
        });
        Self::new(resource_id, requester, LockEventType::LockConflict, Some(data), at)
    }

    /// Create a lock expired event
    pub fn expired(lock: &Lock, actor_id: &str, at: DateTime<Utc>) -> Self {
        let data = serde_json::json!({
            "lock_id": lock.id,
            "holder_id": lock.holder_id,
            "tier": lock.tier,
            "expired_at": lock.expires_at,
        });
        Self::new(&lock.resource_id, actor_id, LockEventType::LockExpired, Some(data), at)
    }

    /// Create a lock overridden event
    pub fn overridden(lock: &Lock, previous: Option<&Lock>, reason: &str, at: DateTime<Utc>) -> Self {
        let data = serde_json::json!({
            "lock_id": lock.id,
            "tier": lock.tier,
            "expires_at": lock.expires_at,
            "reason": reason,
            "previous_holder": previous.map(|l| l.holder_id.as_str()),
            "previous_tier": previous.map(|l| l.tier),
            "previous_lock_id": previous.map(|l| l.id),
        });
        Self::new(&lock.resource_id, &lock.holder_id, LockEventType::LockOverridden, Some(data), at)
    }
}

impl DomainEvent for LockEvent {
    fn event_type(&self) -> &str {
        self.event_type.as_str()
    }

    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn actor_id(&self) -> &str {
        &self.actor_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }
}
