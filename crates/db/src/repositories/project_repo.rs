//! Repository for the `projects` table.

use sqlx::PgExecutor;
use storyreel_core::status::StatusId;
use storyreel_core::types::DbId;

use crate::models::project::ProjectRow;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, name, description, original_topic, status_id, created_at, updated_at";

pub struct ProjectRepo;

impl ProjectRepo {
    /// Insert a new project in `draft`, returning the created row.
    pub async fn create(
        executor: impl PgExecutor<'_>,
        name: &str,
        description: &str,
        original_topic: &str,
    ) -> Result<ProjectRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (name, description, original_topic)
             VALUES ($1, $2, $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProjectRow>(&query)
            .bind(name)
            .bind(description)
            .bind(original_topic)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id(
        executor: impl PgExecutor<'_>,
        id: DbId,
    ) -> Result<Option<ProjectRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1");
        sqlx::query_as::<_, ProjectRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Set the status unconditionally. Returns `None` if the project does not exist.
    pub async fn set_status(
        executor: impl PgExecutor<'_>,
        id: DbId,
        status_id: StatusId,
    ) -> Result<Option<ProjectRow>, sqlx::Error> {
        let query = format!("UPDATE projects SET status_id = $2 WHERE id = $1 RETURNING {COLUMNS}");
        sqlx::query_as::<_, ProjectRow>(&query)
            .bind(id)
            .bind(status_id)
            .fetch_optional(executor)
            .await
    }

    /// Compare-and-set on the status.
    ///
    /// Returns `None` if the project does not exist or is not in `from`.
    pub async fn transition_status(
        executor: impl PgExecutor<'_>,
        id: DbId,
        from: StatusId,
        to: StatusId,
    ) -> Result<Option<ProjectRow>, sqlx::Error> {
        let query = format!(
            "UPDATE projects SET status_id = $3
             WHERE id = $1 AND status_id = $2
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProjectRow>(&query)
            .bind(id)
            .bind(from)
            .bind(to)
            .fetch_optional(executor)
            .await
    }
}
