//! The command surface of the pipeline: start, observe, and steer work.
//!
//! Stage and pipeline runs are spawned onto the Tokio runtime; callers get
//! a [`JobHandle`] back immediately and observe progress through the
//! [`ProgressHub`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use storyreel_core::error::CoreError;
use storyreel_core::records::{GeneratedImage, GeneratedVideo, NewProject, Project, StageRecord};
use storyreel_core::stage::StageType;
use storyreel_core::status::{ProjectStatus, StageStatus};
use storyreel_core::store::PipelineStore;
use storyreel_core::types::DbId;
use storyreel_events::{ChannelKey, ProgressHub, Publisher};
use storyreel_pipeline::{processor_for, PipelineServices, StageContext};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::dispatcher::{StageOutcome, TaskDispatcher};
use crate::registry::{JobHandle, JobRegistry, JobState, JobStatus};
use crate::runner::PipelineRunner;

/// A project together with its stage records in pipeline order.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOverview {
    #[serde(flatten)]
    pub project: Project,
    pub stages: Vec<StageRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectAssets {
    pub images: Vec<GeneratedImage>,
    pub videos: Vec<GeneratedVideo>,
}

#[derive(Clone)]
pub struct PipelineEngine {
    services: PipelineServices,
    hub: ProgressHub,
    registry: Arc<JobRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    max_retries: i32,
}

impl PipelineEngine {
    /// Build an engine. `config.processor` replaces the processor settings
    /// carried by `services`.
    pub fn new(mut services: PipelineServices, hub: ProgressHub, config: &WorkerConfig) -> Self {
        services.config = config.processor.clone();
        let dispatcher = Arc::new(TaskDispatcher::new(services.clone(), config.event_buffer));
        Self {
            services,
            hub,
            registry: Arc::new(JobRegistry::new()),
            dispatcher,
            max_retries: config.max_retries,
        }
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.services.store
    }

    // ---- projects ----

    pub async fn create_project(&self, mut new: NewProject) -> Result<Project, CoreError> {
        new.max_retries.get_or_insert(self.max_retries);
        let project = self.services.store.create_project(new).await?;
        tracing::info!(project_id = project.id, "Project created");
        Ok(project)
    }

    pub async fn project_overview(&self, project_id: DbId) -> Result<ProjectOverview, CoreError> {
        let project = self.services.store.get_project(project_id).await?;
        let stages = self.services.store.list_stages(project_id).await?;
        Ok(ProjectOverview { project, stages })
    }

    pub async fn assets(&self, project_id: DbId) -> Result<ProjectAssets, CoreError> {
        self.services.store.get_project(project_id).await?;
        Ok(ProjectAssets {
            images: self.services.store.list_images(project_id).await?,
            videos: self.services.store.list_videos(project_id).await?,
        })
    }

    // ---- running work ----

    /// Validate, claim, and spawn one stage.
    ///
    /// Preconditions are checked against stored state; an `input` override
    /// is only written by the claim itself, so a stage that cannot start
    /// keeps its stored input.
    pub async fn start_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
        selector: Option<Vec<i32>>,
    ) -> Result<JobHandle, CoreError> {
        let project = self.runnable_project(project_id).await?;
        processor_for(stage, self.services.clone())
            .check_preconditions(&project)
            .await?;
        self.launch_stage(project_id, stage, input, selector).await
    }

    /// Re-run a failed stage with its stored input.
    pub async fn retry_stage(&self, project_id: DbId, stage: StageType) -> Result<JobHandle, CoreError> {
        let record = self.services.store.get_stage(project_id, stage).await?;
        if record.status != StageStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "Stage {stage} is {}, only failed stages can be retried",
                record.status
            )));
        }
        if !record.retries_remaining() {
            return Err(CoreError::Conflict(format!(
                "Stage {stage} has used all {} retries",
                record.max_retries
            )));
        }

        let project = self.runnable_project(project_id).await?;
        processor_for(stage, self.services.clone())
            .check_preconditions(&project)
            .await?;
        tracing::info!(project_id, stage = %stage, retry_count = record.retry_count, "Retrying stage");
        self.launch_stage(project_id, stage, None, None).await
    }

    /// Spawn the full pipeline for a project.
    ///
    /// Only one run per project is accepted at a time; a second call while
    /// the first is still going fails with [`CoreError::Conflict`].
    pub async fn run_pipeline(&self, project_id: DbId) -> Result<JobHandle, CoreError> {
        let slot = self.registry.claim_pipeline(project_id).ok_or_else(|| {
            CoreError::Conflict(format!(
                "A pipeline run for project {project_id} is already in progress"
            ))
        })?;
        self.runnable_project(project_id).await?;
        let stages = self.services.store.list_stages(project_id).await?;
        if let Some(running) = stages.iter().find(|s| s.status == StageStatus::Processing) {
            return Err(CoreError::Conflict(format!(
                "Stage {} of project {project_id} is already running",
                running.stage
            )));
        }

        let project = self
            .services
            .store
            .set_project_status(project_id, ProjectStatus::Processing)
            .await?;
        let job = self.registry.register(project_id, None).await;
        let cancel = self.registry.token_for(project_id).await;
        let publisher = self.hub.publisher(project_id, None);

        let engine = self.clone();
        let job_id = job.job_id;
        tokio::spawn(async move {
            engine.registry.mark_running(job_id).await;
            let runner = PipelineRunner::new(Arc::clone(&engine.dispatcher));
            let summary = runner.run(project, cancel, &publisher).await;
            drop(publisher);

            let (state, error) = match summary.failure {
                None => (JobState::Succeeded, None),
                Some(_) if summary.cancelled => (JobState::Cancelled, None),
                Some((stage, error)) => (JobState::Failed, Some(format!("{stage}: {error}"))),
            };
            drop(slot);
            engine.registry.finish(job_id, state, error).await;
        });

        Ok(JobHandle {
            job_id,
            project_id,
            stage: None,
            channel: ChannelKey::project(project_id).to_string(),
        })
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<JobStatus, CoreError> {
        self.registry.get(job_id).await
    }

    // ---- steering ----

    /// Reset `stage` and everything downstream to `pending`.
    pub async fn rollback(
        &self,
        project_id: DbId,
        stage: StageType,
    ) -> Result<Vec<StageRecord>, CoreError> {
        let records = self.services.store.rollback_from(project_id, stage).await?;
        tracing::info!(project_id, stage = %stage, reset = records.len(), "Stages rolled back");
        Ok(records)
    }

    /// Pause a processing project and cancel its in-flight work.
    pub async fn pause(&self, project_id: DbId) -> Result<Project, CoreError> {
        let project = self
            .services
            .store
            .transition_project_status(project_id, ProjectStatus::Processing, ProjectStatus::Paused)
            .await?;
        let cancelled = self.registry.cancel_project(project_id).await;
        tracing::info!(project_id, cancelled, "Project paused");
        Ok(project)
    }

    /// Return a paused project to `processing`. Does not restart work.
    pub async fn resume(&self, project_id: DbId) -> Result<Project, CoreError> {
        let project = self
            .services
            .store
            .transition_project_status(project_id, ProjectStatus::Paused, ProjectStatus::Processing)
            .await?;
        tracing::info!(project_id, "Project resumed");
        Ok(project)
    }

    pub async fn update_stage_data(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
        output: Option<Value>,
    ) -> Result<StageRecord, CoreError> {
        self.services
            .store
            .update_stage_data(project_id, stage, input, output)
            .await
    }

    // ---- internals ----

    async fn runnable_project(&self, project_id: DbId) -> Result<Project, CoreError> {
        let project = self.services.store.get_project(project_id).await?;
        if project.status == ProjectStatus::Paused {
            return Err(CoreError::Conflict(format!(
                "Project {project_id} is paused, resume it first"
            )));
        }
        Ok(project)
    }

    async fn launch_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
        selector: Option<Vec<i32>>,
    ) -> Result<JobHandle, CoreError> {
        let publisher = self.hub.publisher(project_id, Some(stage));
        self.dispatcher.claim(project_id, stage, input, &publisher).await?;
        let project = self
            .services
            .store
            .set_project_status(project_id, ProjectStatus::Processing)
            .await?;

        let job = self.registry.register(project_id, Some(stage)).await;
        let cancel = self.registry.token_for(project_id).await;
        let ctx = StageContext::new(project, stage)
            .with_selector(selector)
            .with_cancel(cancel);

        let engine = self.clone();
        let job_id = job.job_id;
        tokio::spawn(async move {
            engine.run_stage_job(job_id, ctx, publisher).await;
        });

        Ok(JobHandle {
            job_id,
            project_id,
            stage: Some(stage),
            channel: ChannelKey::stage(project_id, stage).to_string(),
        })
    }

    async fn run_stage_job(&self, job_id: Uuid, ctx: StageContext, publisher: Publisher) {
        let project_id = ctx.project.id;
        self.registry.mark_running(job_id).await;
        let outcome = self.dispatcher.run_claimed(ctx, &publisher).await;
        drop(publisher);

        self.settle_project_status(project_id, &outcome).await;
        let (state, error) = match outcome {
            StageOutcome::Succeeded(_) => (JobState::Succeeded, None),
            StageOutcome::Failed(error) => (JobState::Failed, Some(error)),
            StageOutcome::Cancelled => (JobState::Cancelled, None),
        };
        self.registry.finish(job_id, state, error).await;
    }

    /// Move the project out of `processing` once no stage runs any more.
    ///
    /// Success leaves it `draft`, or `completed` once every stage is
    /// completed; failure marks it `failed`. A paused project is left alone.
    async fn settle_project_status(&self, project_id: DbId, outcome: &StageOutcome) {
        let store = &self.services.store;
        let stages = match store.list_stages(project_id).await {
            Ok(stages) => stages,
            Err(e) => {
                tracing::error!(project_id, error = %e, "Failed to load stages after run");
                return;
            }
        };
        if stages.iter().any(|s| s.status == StageStatus::Processing) {
            return;
        }

        let next = match outcome {
            StageOutcome::Cancelled => return,
            StageOutcome::Failed(_) => ProjectStatus::Failed,
            StageOutcome::Succeeded(_)
                if stages.iter().all(|s| s.status == StageStatus::Completed) =>
            {
                ProjectStatus::Completed
            }
            StageOutcome::Succeeded(_) => ProjectStatus::Draft,
        };
        if let Err(e) = store
            .transition_project_status(project_id, ProjectStatus::Processing, next)
            .await
        {
            tracing::debug!(project_id, error = %e, "Project status left unchanged");
        }
    }
}
