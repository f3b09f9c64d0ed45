//! Generated image and video rows.

use serde_json::Value;
use sqlx::FromRow;
use storyreel_core::error::CoreError;
use storyreel_core::records::{GeneratedImage, GeneratedVideo};
use storyreel_core::status::{AssetStatus, StatusId};
use storyreel_core::types::{DbId, Timestamp};

use super::decode_status;

#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub id: DbId,
    pub project_id: DbId,
    pub sequence_number: i32,
    pub status_id: StatusId,
    pub url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub provider: String,
    pub prompt: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: Timestamp,
}

impl TryFrom<ImageRow> for GeneratedImage {
    type Error = CoreError;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        Ok(GeneratedImage {
            id: row.id,
            project_id: row.project_id,
            sequence_number: row.sequence_number,
            status: decode_status("asset_statuses", row.status_id, AssetStatus::from_id)?,
            url: row.url,
            width: row.width,
            height: row.height,
            provider: row.provider,
            prompt: row.prompt,
            error_message: row.error_message,
            retry_count: row.retry_count,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct VideoRow {
    pub id: DbId,
    pub project_id: DbId,
    pub sequence_number: i32,
    pub image_id: Option<DbId>,
    pub camera_movement: Value,
    pub status_id: StatusId,
    pub url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<f64>,
    pub fps: Option<i32>,
    pub provider: String,
    pub prompt: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: Timestamp,
}

impl TryFrom<VideoRow> for GeneratedVideo {
    type Error = CoreError;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        Ok(GeneratedVideo {
            id: row.id,
            project_id: row.project_id,
            sequence_number: row.sequence_number,
            image_id: row.image_id,
            camera_movement: row.camera_movement,
            status: decode_status("asset_statuses", row.status_id, AssetStatus::from_id)?,
            url: row.url,
            width: row.width,
            height: row.height,
            duration: row.duration,
            fps: row.fps,
            provider: row.provider,
            prompt: row.prompt,
            error_message: row.error_message,
            retry_count: row.retry_count,
            created_at: row.created_at,
        })
    }
}
