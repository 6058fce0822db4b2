//! Audit trail
//!
//! Every lock and lifecycle mutation, successful or not, produces exactly one
//! `AuditEntry`. Entries are append-only; read-only queries are not audited.

pub mod entry;
pub mod recorder;
pub mod repository;

pub use entry::{AuditAction, AuditEntry, AuditOutcome};
pub use recorder::{AuditRecorder, InMemoryAuditLog};
pub use repository::SqliteAuditLog;
