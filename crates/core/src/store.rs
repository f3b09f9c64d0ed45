//! Persistence seam for projects, stage records, and generated assets.
//!
//! Every method that changes a stage record is a single atomic operation
//! at the persistence boundary: implementations must never let two callers
//! interleave a read-modify-write of the same record. This is what keeps
//! concurrent scene writes (for example the image stage pre-staging into
//! the video stage's input) from clobbering each other.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::records::{
    GeneratedImage, GeneratedVideo, NewImage, NewProject, NewVideo, OutputWrite, PayloadSlot,
    Project, StageRecord,
};
use crate::scene::ScenePatch;
use crate::stage::StageType;
use crate::status::{ProjectStatus, StageStatus};
use crate::types::DbId;

#[async_trait]
pub trait PipelineStore: Send + Sync {
    // ---- projects ----

    /// Create a project together with all five stage records (`pending`).
    async fn create_project(&self, new: NewProject) -> Result<Project, CoreError>;

    async fn get_project(&self, id: DbId) -> Result<Project, CoreError>;

    /// Unconditionally set the project status.
    async fn set_project_status(
        &self,
        id: DbId,
        status: ProjectStatus,
    ) -> Result<Project, CoreError>;

    /// Move the project from `from` to `to`, or fail with
    /// [`CoreError::Conflict`] if it is not currently in `from`.
    async fn transition_project_status(
        &self,
        id: DbId,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<Project, CoreError>;

    // ---- stage records ----

    async fn get_stage(&self, project_id: DbId, stage: StageType)
        -> Result<StageRecord, CoreError>;

    /// All stage records of a project in pipeline order.
    async fn list_stages(&self, project_id: DbId) -> Result<Vec<StageRecord>, CoreError>;

    /// Atomically move a stage to `processing`, stamping `started_at` and
    /// clearing the previous error and completion time.
    ///
    /// When `input` is given it replaces the stage input in the same write,
    /// so a rejected claim never leaves a modified input behind.
    ///
    /// Fails with [`CoreError::Conflict`] when
    /// [`StageRecord::check_claimable`] rejects the current record (already
    /// running, `completed`, or `failed` with no retries left).
    async fn claim_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
    ) -> Result<StageRecord, CoreError>;

    /// Terminal success write for a `processing` stage.
    async fn complete_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        status: StageStatus,
        write: OutputWrite,
    ) -> Result<StageRecord, CoreError>;

    /// Terminal failure write.
    ///
    /// Only a `processing` stage is changed; any other status is returned
    /// untouched, which makes repeated calls harmless. `count_retry`
    /// controls whether `retry_count` is incremented.
    async fn fail_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        error: &str,
        count_retry: bool,
    ) -> Result<StageRecord, CoreError>;

    /// Apply scene patches to one payload of a stage in a single update.
    async fn merge_scenes(
        &self,
        project_id: DbId,
        stage: StageType,
        slot: PayloadSlot,
        patches: &[ScenePatch],
    ) -> Result<StageRecord, CoreError>;

    /// Operator edit of a stage's payloads. Rejected while the stage runs.
    async fn update_stage_data(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
        output: Option<Value>,
    ) -> Result<StageRecord, CoreError>;

    /// Reset `stage` and every later stage to `pending`.
    ///
    /// Clears output, error, retry count and timestamps of every affected
    /// stage, clears the pre-staged input of the stages after `stage`, and
    /// sets the project back to `draft`. Fails with
    /// [`CoreError::Conflict`] if any affected stage is running.
    async fn rollback_from(
        &self,
        project_id: DbId,
        stage: StageType,
    ) -> Result<Vec<StageRecord>, CoreError>;

    // ---- assets ----

    async fn record_image(&self, new: NewImage) -> Result<GeneratedImage, CoreError>;

    async fn record_video(&self, new: NewVideo) -> Result<GeneratedVideo, CoreError>;

    /// Most recent `completed` image of one scene.
    async fn latest_completed_image(
        &self,
        project_id: DbId,
        sequence_number: i32,
    ) -> Result<Option<GeneratedImage>, CoreError>;

    async fn list_images(&self, project_id: DbId) -> Result<Vec<GeneratedImage>, CoreError>;

    async fn list_videos(&self, project_id: DbId) -> Result<Vec<GeneratedVideo>, CoreError>;
}
