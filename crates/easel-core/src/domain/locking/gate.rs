//! Resource existence checks for lease writes

use async_trait::async_trait;

use super::types::LockResult;

/// Tells the lock manager whether a resource may still carry leases
///
/// Without a gate the lock manager locks any well-formed resource id.
#[async_trait]
pub trait ResourceGate: Send + Sync + std::fmt::Debug {
    /// False once the resource is gone for good
    async fn is_lockable(&self, resource_id: &str) -> LockResult<bool>;
}
