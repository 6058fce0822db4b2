//! Lease gate backed by lifecycle state

use async_trait::async_trait;
use std::sync::Arc;

use super::repository_trait::ResourceRepository;
use super::types::LifecycleError;
use crate::domain::locking::{LockError, LockResult, ResourceGate};

/// Refuses leases on permanently deleted resources
///
/// Ids that were never registered stay lockable; registration belongs to
/// whoever owns the payload and may happen after the first lock.
#[derive(Debug, Clone)]
pub struct LifecycleGate {
    resources: Arc<dyn ResourceRepository>,
}

impl LifecycleGate {
    pub fn new(resources: Arc<dyn ResourceRepository>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl ResourceGate for LifecycleGate {
    async fn is_lockable(&self, resource_id: &str) -> LockResult<bool> {
        let resource = self.resources.get(resource_id).await.map_err(|e| match e {
            LifecycleError::Corrupted(msg) => LockError::Corrupted(msg),
            other => LockError::StoreUnavailable(other.to_string()),
        })?;
        Ok(!resource.is_some_and(|r| r.is_deleted()))
    }
}
