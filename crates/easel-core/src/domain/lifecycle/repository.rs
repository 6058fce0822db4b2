//! Resource repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::repository_trait::ResourceRepository;
use super::types::{LifecycleError, LifecycleResult, LifecycleState, Resource};

const SELECT_RESOURCE: &str = r#"
    SELECT id, title, lifecycle_state, created_by, created_at, updated_at,
           archived_at, archived_by
    FROM resources
"#;

/// Repository for resource database operations
#[derive(Debug, Clone)]
pub struct SqliteResourceRepository {
    pool: SqlitePool,
}

impl SqliteResourceRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ResourceRepository for SqliteResourceRepository {
    async fn insert(&self, resource: &Resource) -> LifecycleResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO resources (
                id, title, lifecycle_state, created_by, created_at, updated_at,
                archived_at, archived_by
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&resource.id)
        .bind(&resource.title)
        .bind(resource.lifecycle_state.as_str())
        .bind(&resource.created_by)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .bind(resource.archived_at)
        .bind(&resource.archived_by)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, resource_id: &str) -> LifecycleResult<Option<Resource>> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_RESOURCE))
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ResourceRow::into_resource).transpose()
    }

    async fn transition(
        &self,
        resource_id: &str,
        from: LifecycleState,
        to: LifecycleState,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> LifecycleResult<bool> {
        let query = match to {
            LifecycleState::Archived => sqlx::query(
                r#"
                UPDATE resources
                SET lifecycle_state = ?, updated_at = ?, archived_at = ?, archived_by = ?
                WHERE id = ? AND lifecycle_state = ?
                "#,
            )
            .bind(to.as_str())
            .bind(now)
            .bind(Some(now))
            .bind(Some(actor_id)),
            LifecycleState::Active => sqlx::query(
                r#"
                UPDATE resources
                SET lifecycle_state = ?, updated_at = ?, archived_at = NULL, archived_by = NULL
                WHERE id = ? AND lifecycle_state = ?
                "#,
            )
            .bind(to.as_str())
            .bind(now),
            LifecycleState::Deleted => sqlx::query(
                r#"
                UPDATE resources
                SET lifecycle_state = ?, updated_at = ?
                WHERE id = ? AND lifecycle_state = ?
                "#,
            )
            .bind(to.as_str())
            .bind(now),
        };

        let result = query
            .bind(resource_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, state: Option<LifecycleState>) -> LifecycleResult<Vec<Resource>> {
        let rows: Vec<ResourceRow> = match state {
            Some(state) => {
                sqlx::query_as(&format!(
                    "{} WHERE lifecycle_state = ? ORDER BY created_at, id",
                    SELECT_RESOURCE
                ))
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!("{} ORDER BY created_at, id", SELECT_RESOURCE))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(ResourceRow::into_resource).collect()
    }
}

// ========== Database Row Types ==========

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: String,
    title: String,
    lifecycle_state: String,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
    archived_by: Option<String>,
}

impl ResourceRow {
    fn into_resource(self) -> LifecycleResult<Resource> {
        let lifecycle_state = LifecycleState::parse(&self.lifecycle_state).ok_or_else(|| {
            LifecycleError::Corrupted(format!("Invalid lifecycle state: {}", self.lifecycle_state))
        })?;

        Ok(Resource {
            id: self.id,
            title: self.title,
            lifecycle_state,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            archived_at: self.archived_at,
            archived_by: self.archived_by,
        })
    }
}
