//! Repository trait for resource persistence
//!
//! Transitions are state-conditioned: the write only lands if the resource is
//! still in the expected state, so racing transitions have a single winner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::types::{LifecycleError, LifecycleResult, LifecycleState, Resource};

/// Repository trait for resource persistence
#[async_trait]
pub trait ResourceRepository: Send + Sync + std::fmt::Debug {
    /// Insert a new resource; returns false if the id is taken
    async fn insert(&self, resource: &Resource) -> LifecycleResult<bool>;

    /// Get a resource by ID, in any state
    async fn get(&self, resource_id: &str) -> LifecycleResult<Option<Resource>>;

    /// Move a resource from `from` to `to`
    ///
    /// Returns false when the resource is missing or no longer in `from`.
    async fn transition(
        &self,
        resource_id: &str,
        from: LifecycleState,
        to: LifecycleState,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> LifecycleResult<bool>;

    /// List resources, optionally filtered by state
    async fn list(&self, state: Option<LifecycleState>) -> LifecycleResult<Vec<Resource>>;
}

/// Resource repository kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryResourceRepository {
    resources: RwLock<HashMap<String, Resource>>,
}

impl InMemoryResourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<T>(_: T) -> LifecycleError {
        LifecycleError::StoreUnavailable("in-memory resource repository poisoned".to_string())
    }
}

#[async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn insert(&self, resource: &Resource) -> LifecycleResult<bool> {
        let mut resources = self.resources.write().map_err(Self::poisoned)?;
        if resources.contains_key(&resource.id) {
            return Ok(false);
        }
        resources.insert(resource.id.clone(), resource.clone());
        Ok(true)
    }

    async fn get(&self, resource_id: &str) -> LifecycleResult<Option<Resource>> {
        let resources = self.resources.read().map_err(Self::poisoned)?;
        Ok(resources.get(resource_id).cloned())
    }

    async fn transition(
        &self,
        resource_id: &str,
        from: LifecycleState,
        to: LifecycleState,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> LifecycleResult<bool> {
        let mut resources = self.resources.write().map_err(Self::poisoned)?;
        match resources.get_mut(resource_id) {
            Some(resource) if resource.lifecycle_state == from => {
                resource.apply_transition(to, actor_id, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, state: Option<LifecycleState>) -> LifecycleResult<Vec<Resource>> {
        let resources = self.resources.read().map_err(Self::poisoned)?;
        let mut matching: Vec<Resource> = resources
            .values()
            .filter(|r| state.is_none_or(|s| r.lifecycle_state == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}
