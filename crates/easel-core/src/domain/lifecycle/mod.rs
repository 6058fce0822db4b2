//! Resource lifecycle
//!
//! Resources move `Active -> Archived -> Deleted`, with restore as the only
//! way back. Archive checks the lock manager first; permanent delete needs a
//! prior archive and passes a `DeletePolicy`. Once deleted, a resource takes
//! no new leases.

pub mod event;
pub mod gate;
pub mod manager;
pub mod policy;
pub mod repository;
pub mod repository_trait;
pub mod types;

pub use event::{ResourceEvent, ResourceEventType};
pub use gate::LifecycleGate;
pub use manager::LifecycleManager;
pub use policy::{ActorAllowList, AllowAll, DeletePolicy};
pub use repository::SqliteResourceRepository;
pub use repository_trait::{InMemoryResourceRepository, ResourceRepository};
pub use types::{LifecycleError, LifecycleResult, LifecycleState, Resource};
