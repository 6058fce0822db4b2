//! Lifecycle domain events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{LifecycleState, Resource};
use crate::domain::events::DomainEvent;

/// Type of resource event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceEventType {
    ResourceRegistered,
    ResourceArchived,
    ResourceRestored,
    ResourceDeleted,
}

impl ResourceEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceRegistered => "resource_registered",
            Self::ResourceArchived => "resource_archived",
            Self::ResourceRestored => "resource_restored",
            Self::ResourceDeleted => "resource_deleted",
        }
    }

    /// Event emitted on entering `state`
    pub fn for_state(state: LifecycleState) -> Self {
        match state {
            LifecycleState::Active => Self::ResourceRestored,
            LifecycleState::Archived => Self::ResourceArchived,
            LifecycleState::Deleted => Self::ResourceDeleted,
        }
    }
}

/// A lifecycle domain event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub id: Uuid,
    pub resource_id: String,
    pub actor_id: String,
    pub event_type: ResourceEventType,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ResourceEvent {
    /// Create an event describing `resource` after the change
    pub fn new(
        event_type: ResourceEventType,
        resource: &Resource,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let data = serde_json::json!({
            "title": resource.title,
            "lifecycle_state": resource.lifecycle_state,
        });

        Self {
            id: Uuid::new_v4(),
            resource_id: resource.id.clone(),
            actor_id: actor_id.to_string(),
            event_type,
            data: Some(data),
            created_at: at,
        }
    }
}

impl DomainEvent for ResourceEvent {
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
