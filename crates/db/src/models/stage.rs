//! Stage record rows.

use serde_json::Value;
use sqlx::FromRow;
use storyreel_core::error::CoreError;
use storyreel_core::records::StageRecord;
use storyreel_core::stage::StageType;
use storyreel_core::status::{StageStatus, StatusId};
use storyreel_core::types::{DbId, Timestamp};

use super::decode_status;

/// A row from the `project_stages` table.
#[derive(Debug, Clone, FromRow)]
pub struct StageRow {
    pub id: DbId,
    pub project_id: DbId,
    pub stage_type: String,
    pub status_id: StatusId,
    pub input: Value,
    pub output: Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl TryFrom<StageRow> for StageRecord {
    type Error = CoreError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        let stage: StageType = row
            .stage_type
            .parse()
            .map_err(|_| CoreError::Internal(format!("Unknown stage type '{}'", row.stage_type)))?;
        Ok(StageRecord {
            id: row.id,
            project_id: row.project_id,
            stage,
            status: decode_status("stage_statuses", row.status_id, StageStatus::from_id)?,
            input: row.input,
            output: row.output,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}
