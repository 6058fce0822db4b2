//! Database migrations
//!
//! This module manages SQLite schema migrations for easel.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Leases, resources and audit log
const MIGRATION_V1: &str = r#"
    -- One row per lease key. `version` is the compare-and-swap token; every
    -- write takes a fresh value from lease_versions, so a key that is
    -- deleted and created again never repeats an earlier version.
    CREATE TABLE IF NOT EXISTS leases (
        resource_id TEXT NOT NULL,
        slot TEXT NOT NULL,
        lock_id TEXT NOT NULL UNIQUE,
        holder_id TEXT NOT NULL,
        tier TEXT NOT NULL CHECK (tier IN ('view', 'edit', 'system', 'emergency')),
        acquired_at TIMESTAMP NOT NULL,
        expires_at TIMESTAMP NOT NULL,
        purpose TEXT NOT NULL DEFAULT '',
        active BOOLEAN NOT NULL DEFAULT 1,
        renewal_count INTEGER NOT NULL DEFAULT 0,
        released_at TIMESTAMP,
        version INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (resource_id, slot)
    );

    CREATE INDEX IF NOT EXISTS idx_leases_expires_at ON leases(expires_at);
    CREATE INDEX IF NOT EXISTS idx_leases_holder_id ON leases(holder_id);

    CREATE TABLE IF NOT EXISTS lease_versions (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        value INTEGER NOT NULL
    );

    INSERT OR IGNORE INTO lease_versions (id, value) VALUES (1, 0);

    -- Resources
    CREATE TABLE IF NOT EXISTS resources (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        lifecycle_state TEXT NOT NULL DEFAULT 'active' CHECK (lifecycle_state IN ('active', 'archived', 'deleted')),
        created_by TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        archived_at TIMESTAMP,
        archived_by TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_resources_lifecycle_state ON resources(lifecycle_state);

    -- Append-only audit trail. No foreign key: entries outlive their resource.
    CREATE TABLE IF NOT EXISTS audit_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        resource_id TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        action TEXT NOT NULL,
        tier TEXT,
        lock_id TEXT,
        timestamp TIMESTAMP NOT NULL,
        reason TEXT,
        outcome TEXT NOT NULL,
        detail TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_audit_log_resource_id ON audit_log(resource_id);
    CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp);

    CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END;
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: (i32,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    // Apply migrations in order
    if current_version < 1 {
        tracing::info!("Applying migration v1: Leases, resources and audit log");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
