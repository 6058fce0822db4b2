//! Easel Core Library
//!
//! This crate arbitrates concurrent editing access to shared canvases and
//! governs their lifecycle, including:
//! - Lease store with compare-and-swap writes (SQLite + in-memory)
//! - Lock manager (acquire, refresh, release, override, status)
//! - Lifecycle manager (register, archive, restore, permanent delete)
//! - Background expiry sweeper
//! - Append-only audit log and outbound domain events

pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use error::{Error, Result};

#[cfg(test)]
mod error_tests;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::audit::{AuditEntry, AuditRecorder};
    pub use crate::domain::clock::{Clock, SystemClock};
    pub use crate::domain::lifecycle::{LifecycleError, LifecycleManager, LifecycleState, Resource};
    pub use crate::domain::locking::{
        Lock, LockError, LockManager, LockStatus, LockTier, ReleaseOutcome,
    };
    pub use crate::error::{Error, Result};
}
