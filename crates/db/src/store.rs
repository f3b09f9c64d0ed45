//! [`PipelineStore`] on PostgreSQL.
//!
//! Simple transitions are single conditional `UPDATE ... RETURNING`
//! statements. Writes that need the current payload (output merges, scene
//! patches, rollbacks) lock the affected rows with `SELECT ... FOR UPDATE`
//! and write back inside the same transaction, so concurrent scene writes
//! to one stage serialize on the row lock.

use async_trait::async_trait;
use serde_json::Value;
use storyreel_core::error::CoreError;
use storyreel_core::records::{
    GeneratedImage, GeneratedVideo, NewImage, NewProject, NewVideo, OutputWrite, PayloadSlot,
    Project, StageRecord, DEFAULT_MAX_RETRIES,
};
use storyreel_core::scene::{merge_payload, ScenePatch};
use storyreel_core::stage::{StageType, STAGE_ORDER};
use storyreel_core::status::{ProjectStatus, StageStatus, StatusId};
use storyreel_core::store::PipelineStore;
use storyreel_core::types::DbId;

use crate::repositories::{ImageRepo, ProjectRepo, StageRepo, VideoRepo};
use crate::{db_error, DbPool};

/// Statuses a stage may be claimed from.
const CLAIMABLE: [StageStatus; 4] = [
    StageStatus::Pending,
    StageStatus::Skipped,
    StageStatus::Failed,
    StageStatus::PartiallyCompleted,
];

fn claimable_status_ids() -> Vec<StatusId> {
    CLAIMABLE.into_iter().map(StageStatus::id).collect()
}

fn stage_names(stages: &[StageType]) -> Vec<String> {
    stages.iter().map(|s| s.as_str().to_string()).collect()
}

fn stage_not_found(project_id: DbId, stage: StageType) -> CoreError {
    CoreError::not_found("stage", format!("{project_id}/{stage}"))
}

/// Convert rows and put them in pipeline order.
fn ordered_records<R>(rows: Vec<R>) -> Result<Vec<StageRecord>, CoreError>
where
    StageRecord: TryFrom<R, Error = CoreError>,
{
    let mut records = rows
        .into_iter()
        .map(StageRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    records.sort_by_key(|r| r.stage.position());
    Ok(records)
}

#[derive(Clone)]
pub struct PgPipelineStore {
    pool: DbPool,
}

impl PgPipelineStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn require_project(&self, id: DbId) -> Result<Project, CoreError> {
        ProjectRepo::find_by_id(&self.pool, id)
            .await
            .map_err(db_error)?
            .ok_or_else(|| CoreError::not_found("project", id))?
            .try_into()
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn create_project(&self, new: NewProject) -> Result<Project, CoreError> {
        if new.original_topic.trim().is_empty() {
            return Err(CoreError::Validation("Topic must not be empty".into()));
        }
        let max_retries = new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let row = ProjectRepo::create(&mut *tx, &new.name, &new.description, &new.original_topic)
            .await
            .map_err(db_error)?;
        StageRepo::create_for_project(&mut *tx, row.id, &stage_names(&STAGE_ORDER), max_retries)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        row.try_into()
    }

    async fn get_project(&self, id: DbId) -> Result<Project, CoreError> {
        self.require_project(id).await
    }

    async fn set_project_status(
        &self,
        id: DbId,
        status: ProjectStatus,
    ) -> Result<Project, CoreError> {
        ProjectRepo::set_status(&self.pool, id, status.id())
            .await
            .map_err(db_error)?
            .ok_or_else(|| CoreError::not_found("project", id))?
            .try_into()
    }

    async fn transition_project_status(
        &self,
        id: DbId,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<Project, CoreError> {
        let row = ProjectRepo::transition_status(&self.pool, id, from.id(), to.id())
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => row.try_into(),
            None => {
                let current = self.require_project(id).await?;
                Err(CoreError::Conflict(format!(
                    "Project {id} is {}, expected {from}",
                    current.status
                )))
            }
        }
    }

    async fn get_stage(
        &self,
        project_id: DbId,
        stage: StageType,
    ) -> Result<StageRecord, CoreError> {
        StageRepo::find(&self.pool, project_id, stage.as_str())
            .await
            .map_err(db_error)?
            .ok_or_else(|| stage_not_found(project_id, stage))?
            .try_into()
    }

    async fn list_stages(&self, project_id: DbId) -> Result<Vec<StageRecord>, CoreError> {
        let rows = StageRepo::list_by_project(&self.pool, project_id)
            .await
            .map_err(db_error)?;
        if rows.is_empty() {
            self.require_project(project_id).await?;
        }
        ordered_records(rows)
    }

    async fn claim_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
    ) -> Result<StageRecord, CoreError> {
        let claimed = StageRepo::claim(
            &self.pool,
            project_id,
            stage.as_str(),
            StageStatus::Processing.id(),
            &claimable_status_ids(),
            StageStatus::Failed.id(),
            input.as_ref(),
        )
        .await
        .map_err(db_error)?;

        match claimed {
            Some(row) => row.try_into(),
            None => {
                let current = self.get_stage(project_id, stage).await?;
                current.check_claimable()?;
                Err(CoreError::Conflict(format!(
                    "Stage {stage} of project {project_id} is {} and cannot start",
                    current.status
                )))
            }
        }
    }

    async fn complete_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        status: StageStatus,
        write: OutputWrite,
    ) -> Result<StageRecord, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut record: StageRecord =
            StageRepo::find_for_update(&mut *tx, project_id, stage.as_str())
                .await
                .map_err(db_error)?
                .ok_or_else(|| stage_not_found(project_id, stage))?
                .try_into()?;

        if !record.status.can_transition_to(status) || status == StageStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "Stage {stage} of project {project_id} cannot move from {} to {status}",
                record.status
            )));
        }
        match write {
            OutputWrite::Replace(output) => record.output = output,
            OutputWrite::Merge(incoming) => merge_payload(&mut record.output, &incoming),
        }

        let row = StageRepo::complete(&mut *tx, record.id, status.id(), &record.output)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        row.try_into()
    }

    async fn fail_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        error: &str,
        count_retry: bool,
    ) -> Result<StageRecord, CoreError> {
        let failed = StageRepo::fail(
            &self.pool,
            project_id,
            stage.as_str(),
            StageStatus::Processing.id(),
            StageStatus::Failed.id(),
            error,
            count_retry,
        )
        .await
        .map_err(db_error)?;

        match failed {
            Some(row) => row.try_into(),
            None => self.get_stage(project_id, stage).await,
        }
    }

    async fn merge_scenes(
        &self,
        project_id: DbId,
        stage: StageType,
        slot: PayloadSlot,
        patches: &[ScenePatch],
    ) -> Result<StageRecord, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut record: StageRecord =
            StageRepo::find_for_update(&mut *tx, project_id, stage.as_str())
                .await
                .map_err(db_error)?
                .ok_or_else(|| stage_not_found(project_id, stage))?
                .try_into()?;

        let payload = match slot {
            PayloadSlot::Input => &mut record.input,
            PayloadSlot::Output => &mut record.output,
        };
        for patch in patches {
            patch.apply(payload);
        }

        let row = StageRepo::set_payloads(&mut *tx, record.id, &record.input, &record.output)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        row.try_into()
    }

    async fn update_stage_data(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
        output: Option<Value>,
    ) -> Result<StageRecord, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let record: StageRecord = StageRepo::find_for_update(&mut *tx, project_id, stage.as_str())
            .await
            .map_err(db_error)?
            .ok_or_else(|| stage_not_found(project_id, stage))?
            .try_into()?;

        if record.status == StageStatus::Processing {
            return Err(CoreError::Conflict(format!(
                "Stage {stage} of project {project_id} is running"
            )));
        }
        let input = input.unwrap_or(record.input);
        let output = output.unwrap_or(record.output);

        let row = StageRepo::set_payloads(&mut *tx, record.id, &input, &output)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        row.try_into()
    }

    async fn rollback_from(
        &self,
        project_id: DbId,
        stage: StageType,
    ) -> Result<Vec<StageRecord>, CoreError> {
        self.require_project(project_id).await?;
        let affected = stage_names(stage.downstream_inclusive());

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let locked = ordered_records(
            StageRepo::find_many_for_update(&mut *tx, project_id, &affected)
                .await
                .map_err(db_error)?,
        )?;
        if let Some(running) = locked.iter().find(|r| !r.status.can_roll_back()) {
            return Err(CoreError::Conflict(format!(
                "Stage {} of project {project_id} is running",
                running.stage
            )));
        }

        let rows = StageRepo::reset(
            &mut *tx,
            project_id,
            &affected,
            stage.as_str(),
            StageStatus::Pending.id(),
        )
        .await
        .map_err(db_error)?;
        ProjectRepo::set_status(&mut *tx, project_id, ProjectStatus::Draft.id())
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        ordered_records(rows)
    }

    async fn record_image(&self, new: NewImage) -> Result<GeneratedImage, CoreError> {
        ImageRepo::create(&self.pool, &new)
            .await
            .map_err(db_error)?
            .try_into()
    }

    async fn record_video(&self, new: NewVideo) -> Result<GeneratedVideo, CoreError> {
        VideoRepo::create(&self.pool, &new)
            .await
            .map_err(db_error)?
            .try_into()
    }

    async fn latest_completed_image(
        &self,
        project_id: DbId,
        sequence_number: i32,
    ) -> Result<Option<GeneratedImage>, CoreError> {
        ImageRepo::latest_completed(&self.pool, project_id, sequence_number)
            .await
            .map_err(db_error)?
            .map(GeneratedImage::try_from)
            .transpose()
    }

    async fn list_images(&self, project_id: DbId) -> Result<Vec<GeneratedImage>, CoreError> {
        ImageRepo::list_by_project(&self.pool, project_id)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(GeneratedImage::try_from)
            .collect()
    }

    async fn list_videos(&self, project_id: DbId) -> Result<Vec<GeneratedVideo>, CoreError> {
        VideoRepo::list_by_project(&self.pool, project_id)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(GeneratedVideo::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimable_statuses_exclude_running_and_completed() {
        let ids = claimable_status_ids();
        assert!(ids.contains(&StageStatus::Pending.id()));
        assert!(ids.contains(&StageStatus::Failed.id()));
        assert!(ids.contains(&StageStatus::PartiallyCompleted.id()));
        assert!(!ids.contains(&StageStatus::Processing.id()));
        assert!(!ids.contains(&StageStatus::Completed.id()));
    }

    #[test]
    fn claimable_list_matches_transition_table() {
        let all = [
            StageStatus::Pending,
            StageStatus::Processing,
            StageStatus::Completed,
            StageStatus::PartiallyCompleted,
            StageStatus::Failed,
            StageStatus::Skipped,
        ];
        for status in all {
            assert_eq!(
                CLAIMABLE.contains(&status),
                status.can_transition_to(StageStatus::Processing),
                "{status}"
            );
        }
    }
}
