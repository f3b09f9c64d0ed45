//! Repositories for `generated_images` and `generated_videos`.

use sqlx::PgExecutor;
use storyreel_core::records::{NewImage, NewVideo};
use storyreel_core::status::{AssetStatus, StatusId};
use storyreel_core::types::DbId;

use crate::models::asset::{ImageRow, VideoRow};

const IMAGE_COLUMNS: &str = "id, project_id, sequence_number, status_id, url, width, height, \
     provider, prompt, error_message, retry_count, created_at";

const VIDEO_COLUMNS: &str = "id, project_id, sequence_number, image_id, camera_movement, \
     status_id, url, width, height, duration, fps, provider, prompt, error_message, \
     retry_count, created_at";

pub struct ImageRepo;

impl ImageRepo {
    pub async fn create(
        executor: impl PgExecutor<'_>,
        input: &NewImage,
    ) -> Result<ImageRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO generated_images
                (project_id, sequence_number, status_id, url, width, height,
                 provider, prompt, error_message, retry_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {IMAGE_COLUMNS}"
        );
        sqlx::query_as::<_, ImageRow>(&query)
            .bind(input.project_id)
            .bind(input.sequence_number)
            .bind(input.status.id())
            .bind(&input.url)
            .bind(input.width)
            .bind(input.height)
            .bind(&input.provider)
            .bind(&input.prompt)
            .bind(&input.error_message)
            .bind(input.retry_count)
            .fetch_one(executor)
            .await
    }

    /// Most recent `completed` image of one scene.
    pub async fn latest_completed(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        sequence_number: i32,
    ) -> Result<Option<ImageRow>, sqlx::Error> {
        let completed: StatusId = AssetStatus::Completed.id();
        let query = format!(
            "SELECT {IMAGE_COLUMNS} FROM generated_images
             WHERE project_id = $1 AND sequence_number = $2 AND status_id = $3
             ORDER BY id DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, ImageRow>(&query)
            .bind(project_id)
            .bind(sequence_number)
            .bind(completed)
            .fetch_optional(executor)
            .await
    }

    /// Every attempt of a project, by scene and then in creation order.
    pub async fn list_by_project(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
    ) -> Result<Vec<ImageRow>, sqlx::Error> {
        let query = format!(
            "SELECT {IMAGE_COLUMNS} FROM generated_images
             WHERE project_id = $1
             ORDER BY sequence_number, id"
        );
        sqlx::query_as::<_, ImageRow>(&query)
            .bind(project_id)
            .fetch_all(executor)
            .await
    }
}

pub struct VideoRepo;

impl VideoRepo {
    pub async fn create(
        executor: impl PgExecutor<'_>,
        input: &NewVideo,
    ) -> Result<VideoRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO generated_videos
                (project_id, sequence_number, image_id, camera_movement, status_id, url,
                 width, height, duration, fps, provider, prompt, error_message, retry_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING {VIDEO_COLUMNS}"
        );
        sqlx::query_as::<_, VideoRow>(&query)
            .bind(input.project_id)
            .bind(input.sequence_number)
            .bind(input.image_id)
            .bind(&input.camera_movement)
            .bind(input.status.id())
            .bind(&input.url)
            .bind(input.width)
            .bind(input.height)
            .bind(input.duration)
            .bind(input.fps)
            .bind(&input.provider)
            .bind(&input.prompt)
            .bind(&input.error_message)
            .bind(input.retry_count)
            .fetch_one(executor)
            .await
    }

    pub async fn list_by_project(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
    ) -> Result<Vec<VideoRow>, sqlx::Error> {
        let query = format!(
            "SELECT {VIDEO_COLUMNS} FROM generated_videos
             WHERE project_id = $1
             ORDER BY sequence_number, id"
        );
        sqlx::query_as::<_, VideoRow>(&query)
            .bind(project_id)
            .fetch_all(executor)
            .await
    }
}
