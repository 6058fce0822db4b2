//! Lifecycle manager
//!
//! Owns `lifecycle_state`. Consults the lock manager before archiving so an
//! active editor is never pulled out from under, and refuses irreversible
//! deletes unless the resource was archived first.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::event::{ResourceEvent, ResourceEventType};
use super::gate::LifecycleGate;
use super::policy::{AllowAll, DeletePolicy};
use super::repository_trait::ResourceRepository;
use super::types::{LifecycleError, LifecycleResult, LifecycleState, Resource};
use crate::domain::audit::{AuditAction, AuditEntry, AuditOutcome, AuditRecorder};
use crate::domain::events::{EventPublisher, NoopPublisher};
use crate::domain::locking::{LockError, LockManager};

/// Lifecycle manager for archive / restore / permanent delete
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    resources: Arc<dyn ResourceRepository>,
    locks: LockManager,
    audit: Arc<dyn AuditRecorder>,
    publisher: Arc<dyn EventPublisher>,
    policy: Arc<dyn DeletePolicy>,
}

impl LifecycleManager {
    /// Create a lifecycle manager
    ///
    /// Time and store timeouts are taken from `locks`. The copy kept here,
    /// returned by `locks()`, refuses new leases on deleted resources.
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        locks: LockManager,
        audit: Arc<dyn AuditRecorder>,
    ) -> Self {
        let gate = Arc::new(LifecycleGate::new(Arc::clone(&resources)));
        Self {
            resources,
            locks: locks.with_resource_gate(gate),
            audit,
            publisher: Arc::new(NoopPublisher),
            policy: Arc::new(AllowAll),
        }
    }

    /// Send events to `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Gate permanent deletion on `policy`
    pub fn with_policy(mut self, policy: Arc<dyn DeletePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The lock manager consulted before transitions, gated on lifecycle state
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Register a new active resource
    ///
    /// A missing `resource_id` gets a fresh UUID. Ids are never reused, not
    /// even after permanent deletion.
    pub async fn register(
        &self,
        resource_id: Option<&str>,
        title: &str,
        created_by: &str,
    ) -> LifecycleResult<Resource> {
        let resource_id = resource_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.try_register(&resource_id, title, created_by).await {
            Ok(resource) => {
                info!(resource_id = %resource.id, created_by, "Resource registered");
                self.succeeded(
                    AuditAction::Register,
                    AuditOutcome::Registered,
                    ResourceEventType::ResourceRegistered,
                    &resource,
                    created_by,
                    json!({ "title": resource.title }),
                )
                .await;
                Ok(resource)
            }
            Err(e) => {
                self.refused(AuditAction::Register, &resource_id, created_by, &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_register(
        &self,
        resource_id: &str,
        title: &str,
        created_by: &str,
    ) -> LifecycleResult<Resource> {
        validate_id("resource_id", resource_id)?;
        validate_id("created_by", created_by)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(LifecycleError::InvalidRequest("title must not be empty".to_string()));
        }

        let resource = Resource::new(resource_id, title, created_by, self.now());
        if !self.call("insert", self.resources.insert(&resource)).await? {
            return Err(LifecycleError::AlreadyExists(resource_id.to_string()));
        }
        Ok(resource)
    }

    /// Look up a resource
    ///
    /// Permanently deleted resources are reported as `NotFound`.
    pub async fn get(&self, resource_id: &str) -> LifecycleResult<Resource> {
        let resource = self.load(resource_id).await?;
        debug!(resource_id, state = %resource.lifecycle_state, "Resource loaded");
        Ok(resource)
    }

    /// List resources, oldest first
    ///
    /// Without a state filter, deleted resources are left out.
    pub async fn list(&self, state: Option<LifecycleState>) -> LifecycleResult<Vec<Resource>> {
        let resources = self.call("list", self.resources.list(state)).await?;
        Ok(match state {
            Some(_) => resources,
            None => resources.into_iter().filter(|r| !r.is_deleted()).collect(),
        })
    }

    /// Archive an active resource
    ///
    /// Refused with `Locked` while someone else holds a live exclusive lock;
    /// that lock is never force-released. The actor's own locks on the
    /// resource are released once the archive lands.
    pub async fn archive(&self, resource_id: &str, actor_id: &str) -> LifecycleResult<Resource> {
        match self.try_archive(resource_id, actor_id).await {
            Ok(resource) => {
                let released: Vec<Uuid> = match self.locks.release_held_by(resource_id, actor_id).await {
                    Ok(locks) => locks.iter().map(|l| l.id).collect(),
                    Err(e) => {
                        warn!(resource_id, actor_id, error = %e, "Failed to release archiver's locks");
                        Vec::new()
                    }
                };
                info!(resource_id, actor_id, released = released.len(), "Resource archived");
                self.succeeded(
                    AuditAction::Archive,
                    AuditOutcome::Archived,
                    ResourceEventType::ResourceArchived,
                    &resource,
                    actor_id,
                    json!({ "released_locks": released }),
                )
                .await;
                Ok(resource)
            }
            Err(e) => {
                self.refused(AuditAction::Archive, resource_id, actor_id, &e).await;
                Err(e)
            }
        }
    }

    async fn try_archive(&self, resource_id: &str, actor_id: &str) -> LifecycleResult<Resource> {
        validate_id("actor_id", actor_id)?;
        let resource = self.load(resource_id).await?;
        if !resource.is_active() {
            return Err(refusal(&resource, LifecycleState::Archived));
        }

        if let Some(lock) = self.locks.exclusive_lock(resource_id).await? {
            if lock.holder_id != actor_id {
                return Err(LifecycleError::Locked {
                    resource_id: resource_id.to_string(),
                    holder_id: lock.holder_id,
                    tier: lock.tier,
                    expires_at: lock.expires_at,
                });
            }
        }

        self.transition(&resource, LifecycleState::Archived, actor_id)
            .await
    }

    /// Return an archived resource to active
    ///
    /// No lock is restored with it.
    pub async fn restore(&self, resource_id: &str, actor_id: &str) -> LifecycleResult<Resource> {
        match self.try_restore(resource_id, actor_id).await {
            Ok(resource) => {
                info!(resource_id, actor_id, "Resource restored");
                self.succeeded(
                    AuditAction::Restore,
                    AuditOutcome::Restored,
                    ResourceEventType::ResourceRestored,
                    &resource,
                    actor_id,
                    json!({}),
                )
                .await;
                Ok(resource)
            }
            Err(e) => {
                self.refused(AuditAction::Restore, resource_id, actor_id, &e).await;
                Err(e)
            }
        }
    }

    async fn try_restore(&self, resource_id: &str, actor_id: &str) -> LifecycleResult<Resource> {
        validate_id("actor_id", actor_id)?;
        let resource = self.load(resource_id).await?;
        if !resource.is_archived() {
            return Err(refusal(&resource, LifecycleState::Active));
        }

        self.transition(&resource, LifecycleState::Active, actor_id)
            .await
    }

    /// Permanently delete an archived resource
    ///
    /// Never archives implicitly. On success every lease record for the
    /// resource is purged and later lookups report `NotFound`.
    pub async fn permanent_delete(
        &self,
        resource_id: &str,
        actor_id: &str,
    ) -> LifecycleResult<Resource> {
        match self.try_delete(resource_id, actor_id).await {
            Ok(resource) => {
                let purged = match self.locks.purge_resource(resource_id).await {
                    Ok(purged) => purged,
                    Err(e) => {
                        warn!(resource_id, error = %e, "Failed to purge leases of deleted resource");
                        0
                    }
                };
                warn!(resource_id, actor_id, purged, "Resource permanently deleted");
                self.succeeded(
                    AuditAction::PermanentDelete,
                    AuditOutcome::Deleted,
                    ResourceEventType::ResourceDeleted,
                    &resource,
                    actor_id,
                    json!({ "purged_leases": purged }),
                )
                .await;
                Ok(resource)
            }
            Err(e) => {
                self.refused(AuditAction::PermanentDelete, resource_id, actor_id, &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_delete(&self, resource_id: &str, actor_id: &str) -> LifecycleResult<Resource> {
        validate_id("actor_id", actor_id)?;
        let resource = self.load(resource_id).await?;
        if !self.policy.may_delete(actor_id, &resource) {
            return Err(LifecycleError::NotAuthorized {
                actor_id: actor_id.to_string(),
                resource_id: resource_id.to_string(),
            });
        }
        if !resource.is_archived() {
            return Err(refusal(&resource, LifecycleState::Deleted));
        }

        self.transition(&resource, LifecycleState::Deleted, actor_id)
            .await
    }

    // ========== Internals ==========

    fn now(&self) -> DateTime<Utc> {
        self.locks.clock().now()
    }

    async fn load(&self, resource_id: &str) -> LifecycleResult<Resource> {
        self.call("get", self.resources.get(resource_id))
            .await?
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| LifecycleError::NotFound(resource_id.to_string()))
    }

    /// State-conditioned write; a lost race is reported against the winner
    async fn transition(
        &self,
        resource: &Resource,
        to: LifecycleState,
        actor_id: &str,
    ) -> LifecycleResult<Resource> {
        let now = self.now();
        let applied = self
            .call(
                "transition",
                self.resources
                    .transition(&resource.id, resource.lifecycle_state, to, actor_id, now),
            )
            .await?;

        if !applied {
            let current = self.load(&resource.id).await?;
            debug!(
                resource_id = %resource.id,
                expected = %resource.lifecycle_state,
                found = %current.lifecycle_state,
                "Lifecycle transition lost a race"
            );
            return Err(refusal(&current, to));
        }

        let mut updated = resource.clone();
        updated.apply_transition(to, actor_id, now);
        Ok(updated)
    }

    async fn call<T>(
        &self,
        op: &str,
        fut: impl Future<Output = LifecycleResult<T>>,
    ) -> LifecycleResult<T> {
        let limit = self.locks.config().store_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(LifecycleError::StoreUnavailable(format!(
                "{} timed out after {}ms",
                op,
                limit.as_millis()
            ))),
        }
    }

    async fn succeeded(
        &self,
        action: AuditAction,
        outcome: AuditOutcome,
        event_type: ResourceEventType,
        resource: &Resource,
        actor_id: &str,
        detail: serde_json::Value,
    ) {
        let now = self.now();
        let entry = AuditEntry::new(&resource.id, actor_id, action, outcome, now).with_detail(detail);
        self.record(entry).await;

        let event = ResourceEvent::new(event_type, resource, actor_id, now);
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(
                resource_id = %resource.id,
                event_type = event_type.as_str(),
                error = %e,
                "Failed to publish resource event"
            );
        }
    }

    async fn refused(
        &self,
        action: AuditAction,
        resource_id: &str,
        actor_id: &str,
        err: &LifecycleError,
    ) {
        warn!(resource_id, actor_id, action = %action, error = %err, "Lifecycle operation refused");
        let entry = AuditEntry::new(resource_id, actor_id, action, failure_outcome(err), self.now())
            .with_detail(json!({ "code": err.code(), "error": err.to_string() }));
        self.record(entry).await;
    }

    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(&entry).await {
            error!(
                resource_id = %entry.resource_id,
                action = %entry.action,
                outcome = %entry.outcome,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }
}

fn validate_id(field: &str, value: &str) -> LifecycleResult<()> {
    if value.trim().is_empty() {
        return Err(LifecycleError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Error for a transition the resource's state does not allow
fn refusal(resource: &Resource, to: LifecycleState) -> LifecycleError {
    match to {
        LifecycleState::Active | LifecycleState::Deleted if !resource.is_archived() => {
            LifecycleError::NotArchived {
                resource_id: resource.id.clone(),
            }
        }
        _ => LifecycleError::InvalidTransition {
            from: resource.lifecycle_state,
            to,
        },
    }
}

fn failure_outcome(err: &LifecycleError) -> AuditOutcome {
    match err {
        LifecycleError::Locked { .. } => AuditOutcome::Conflict,
        LifecycleError::StoreUnavailable(_)
        | LifecycleError::Lock(LockError::StoreUnavailable(_)) => AuditOutcome::Unknown,
        _ => AuditOutcome::Rejected,
    }
}
