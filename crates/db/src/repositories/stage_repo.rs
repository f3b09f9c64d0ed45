//! Repository for the `project_stages` table.
//!
//! Stage rows are addressed by `(project_id, stage_type)`. Functions with a
//! `_for_update` suffix take row locks and must run inside a transaction.

use serde_json::Value;
use sqlx::PgExecutor;
use storyreel_core::status::StatusId;
use storyreel_core::types::DbId;

use crate::models::stage::StageRow;

const COLUMNS: &str = "id, project_id, stage_type, status_id, input, output, retry_count, \
     max_retries, error_message, started_at, completed_at, updated_at";

pub struct StageRepo;

impl StageRepo {
    /// Insert one `pending` row per stage name.
    pub async fn create_for_project(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_types: &[String],
        max_retries: i32,
    ) -> Result<Vec<StageRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO project_stages (project_id, stage_type, max_retries)
             SELECT $1, stage_type, $3 FROM UNNEST($2::text[]) AS stage_type
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .bind(stage_types)
            .bind(max_retries)
            .fetch_all(executor)
            .await
    }

    pub async fn find(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_type: &str,
    ) -> Result<Option<StageRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM project_stages WHERE project_id = $1 AND stage_type = $2"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .bind(stage_type)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_for_update(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_type: &str,
    ) -> Result<Option<StageRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM project_stages
             WHERE project_id = $1 AND stage_type = $2
             FOR UPDATE"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .bind(stage_type)
            .fetch_optional(executor)
            .await
    }

    /// Lock several stages of one project, in id order.
    pub async fn find_many_for_update(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_types: &[String],
    ) -> Result<Vec<StageRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM project_stages
             WHERE project_id = $1 AND stage_type = ANY($2)
             ORDER BY id
             FOR UPDATE"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .bind(stage_types)
            .fetch_all(executor)
            .await
    }

    pub async fn list_by_project(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
    ) -> Result<Vec<StageRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM project_stages WHERE project_id = $1");
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .fetch_all(executor)
            .await
    }

    /// Move a stage to `processing_id` if its status is one of `from`.
    ///
    /// A row in `failed_id` only matches while `retry_count < max_retries`.
    /// `input`, when given, replaces the stored input in the same statement.
    /// Returns `None` when no row matched, either because the stage does not
    /// exist or because its status does not allow the claim.
    #[allow(clippy::too_many_arguments)]
    pub async fn claim(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_type: &str,
        processing_id: StatusId,
        from: &[StatusId],
        failed_id: StatusId,
        input: Option<&Value>,
    ) -> Result<Option<StageRow>, sqlx::Error> {
        let query = format!(
            "UPDATE project_stages SET
                status_id = $3,
                input = COALESCE($6, input),
                error_message = NULL,
                started_at = NOW(),
                completed_at = NULL
             WHERE project_id = $1 AND stage_type = $2 AND status_id = ANY($4)
               AND (status_id <> $5 OR retry_count < max_retries)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .bind(stage_type)
            .bind(processing_id)
            .bind(from)
            .bind(failed_id)
            .bind(input)
            .fetch_optional(executor)
            .await
    }

    /// Terminal success write by row id.
    pub async fn complete(
        executor: impl PgExecutor<'_>,
        id: DbId,
        status_id: StatusId,
        output: &Value,
    ) -> Result<StageRow, sqlx::Error> {
        let query = format!(
            "UPDATE project_stages SET
                status_id = $2,
                output = $3,
                error_message = NULL,
                completed_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(id)
            .bind(status_id)
            .bind(output)
            .fetch_one(executor)
            .await
    }

    /// Terminal failure write. Only touches a row whose status is
    /// `processing_id`; returns `None` otherwise.
    pub async fn fail(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_type: &str,
        processing_id: StatusId,
        failed_id: StatusId,
        error: &str,
        count_retry: bool,
    ) -> Result<Option<StageRow>, sqlx::Error> {
        let query = format!(
            "UPDATE project_stages SET
                status_id = $4,
                error_message = $5,
                retry_count = retry_count + CASE WHEN $6 THEN 1 ELSE 0 END,
                completed_at = NOW()
             WHERE project_id = $1 AND stage_type = $2 AND status_id = $3
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .bind(stage_type)
            .bind(processing_id)
            .bind(failed_id)
            .bind(error)
            .bind(count_retry)
            .fetch_optional(executor)
            .await
    }

    /// Overwrite both payloads by row id.
    pub async fn set_payloads(
        executor: impl PgExecutor<'_>,
        id: DbId,
        input: &Value,
        output: &Value,
    ) -> Result<StageRow, sqlx::Error> {
        let query = format!(
            "UPDATE project_stages SET input = $2, output = $3
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(id)
            .bind(input)
            .bind(output)
            .fetch_one(executor)
            .await
    }

    /// Reset the named stages to `pending_id`.
    ///
    /// The input of `keep_input_of` survives; every other reset stage gets
    /// an empty input.
    pub async fn reset(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_types: &[String],
        keep_input_of: &str,
        pending_id: StatusId,
    ) -> Result<Vec<StageRow>, sqlx::Error> {
        let query = format!(
            "UPDATE project_stages SET
                status_id = $4,
                output = '{{}}'::jsonb,
                input = CASE WHEN stage_type = $3 THEN input ELSE '{{}}'::jsonb END,
                error_message = NULL,
                retry_count = 0,
                started_at = NULL,
                completed_at = NULL
             WHERE project_id = $1 AND stage_type = ANY($2)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StageRow>(&query)
            .bind(project_id)
            .bind(stage_types)
            .bind(keep_input_of)
            .bind(pending_id)
            .fetch_all(executor)
            .await
    }
}
