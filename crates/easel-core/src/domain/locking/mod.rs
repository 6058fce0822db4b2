//! Resource locking for concurrent editing
//!
//! This module arbitrates who may edit a canvas at any moment. Locks are
//! time-bounded leases; a lease nobody refreshes simply stops counting.
//!
//! # Architecture
//!
//! - **Lease Store**: `LeaseStore` trait with SQLite and in-memory backends,
//!   versioned records and compare-and-swap writes
//! - **Lock Manager**: `LockManager` for acquire / refresh / release /
//!   override / status
//! - **Sweeper**: `ExpirySweeper` background cleanup of expired leases
//! - **Gate**: optional `ResourceGate` that keeps leases off deleted resources
//!
//! # Tiers
//!
//! `View < Edit < System < Emergency`. Edit and above share one exclusive
//! lease per resource. View leases are per holder and never contend. Only
//! `override_lock` can displace a live holder, and only from a higher tier.
//!
//! # Example
//!
//! ```ignore
//! use easel_core::domain::locking::{LockConfig, LockManager, LockTier};
//!
//! let manager = LockManager::in_memory(LockConfig::default());
//!
//! let lock = manager
//!     .acquire("canvas-7", "ann", LockTier::Edit, None, "layout pass")
//!     .await?;
//!
//! // Keep the lease alive while editing...
//! manager.refresh(lock.id, "ann", None).await?;
//!
//! manager.release(lock.id, "ann").await?;
//! ```

pub mod event;
pub mod gate;
pub mod manager;
pub mod repository;
pub mod store;
pub mod sweeper;
pub mod types;

// Re-export main types
pub use event::{LockEvent, LockEventType};
pub use gate::ResourceGate;
pub use manager::LockManager;
pub use repository::SqliteLeaseStore;
pub use store::{CasOutcome, InMemoryLeaseStore, LeaseStore, VersionedLock};
pub use sweeper::{ExpirySweeper, SweepReport, SWEEPER_ACTOR};
pub use types::{
    LeaseKey, LeaseSlot, Lock, LockConfig, LockError, LockResult, LockStatus, LockTier,
    ReleaseOutcome, MAX_TTL,
};
