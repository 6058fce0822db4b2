//! Storage layer - SQLite
//!
//! Provides database management and migrations for easel.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! The lease, resource and audit repositories live next to their domain
//! types and take a pool from here.
//!
//! # Usage
//!
//! ```ignore
//! use easel_core::storage::Database;
//!
//! // Create an in-memory database for testing
//! let db = Database::in_memory().await?;
//!
//! // Or open the shared database file
//! let db = Database::open("/var/lib/easel/easel.db").await?;
//! ```

pub mod database;
pub mod migrations;

// Re-export commonly used types
pub use database::{default_database_path, Database, DatabaseConfig};
pub use migrations::{migration_status, run_migrations, MigrationStatus, CURRENT_VERSION};
