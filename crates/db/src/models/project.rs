//! Project rows.

use sqlx::FromRow;
use storyreel_core::error::CoreError;
use storyreel_core::records::Project;
use storyreel_core::status::{ProjectStatus, StatusId};
use storyreel_core::types::{DbId, Timestamp};

use super::decode_status;

/// A row from the `projects` table.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: DbId,
    pub name: String,
    pub description: String,
    pub original_topic: String,
    pub status_id: StatusId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<ProjectRow> for Project {
    type Error = CoreError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            name: row.name,
            description: row.description,
            original_topic: row.original_topic,
            status: decode_status("project_statuses", row.status_id, ProjectStatus::from_id)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
