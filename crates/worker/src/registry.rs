//! In-process bookkeeping for dispatched jobs and their cancellation tokens.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use storyreel_core::error::CoreError;
use storyreel_core::stage::StageType;
use storyreel_core::types::{DbId, Timestamp};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// What a caller gets back when a stage or pipeline is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub project_id: DbId,
    /// `None` for a full pipeline run.
    pub stage: Option<StageType>,
    /// Progress channel to subscribe to.
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub project_id: DbId,
    pub stage: Option<StageType>,
    pub state: JobState,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

/// Registry of jobs started by this process.
///
/// Holds one cancellation token per project; every job of the project
/// shares it, so a pause stops all of them. A cancelled token is replaced
/// by a fresh one the next time a job asks for it.
///
/// At most one pipeline run per project holds a [`PipelineSlot`] at a time.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobStatus>>,
    tokens: RwLock<HashMap<DbId, CancellationToken>>,
    pipelines: Mutex<HashSet<DbId>>,
}

/// Exclusive right to run the pipeline of one project.
///
/// Released when dropped, on every exit path of the run.
#[derive(Debug)]
pub struct PipelineSlot {
    registry: Arc<JobRegistry>,
    project_id: DbId,
}

impl Drop for PipelineSlot {
    fn drop(&mut self) {
        self.registry.active_pipelines().remove(&self.project_id);
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry").finish_non_exhaustive()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, project_id: DbId, stage: Option<StageType>) -> JobStatus {
        let status = JobStatus {
            job_id: Uuid::new_v4(),
            project_id,
            stage,
            state: JobState::Queued,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.write().await.insert(status.job_id, status.clone());
        status
    }

    pub async fn mark_running(&self, job_id: Uuid) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.state = JobState::Running;
        }
    }

    pub async fn finish(&self, job_id: Uuid, state: JobState, error: Option<String>) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.state = state;
            job.error = error;
            job.finished_at = Some(Utc::now());
        }
    }

    pub async fn get(&self, job_id: Uuid) -> Result<JobStatus, CoreError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Job", job_id))
    }

    /// The live cancellation token of a project.
    pub async fn token_for(&self, project_id: DbId) -> CancellationToken {
        let mut tokens = self.tokens.write().await;
        let token = tokens.entry(project_id).or_default();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Reserve the pipeline run of a project. `None` while another run
    /// still holds it.
    pub fn claim_pipeline(self: &Arc<Self>, project_id: DbId) -> Option<PipelineSlot> {
        if !self.active_pipelines().insert(project_id) {
            return None;
        }
        Some(PipelineSlot {
            registry: Arc::clone(self),
            project_id,
        })
    }

    fn active_pipelines(&self) -> std::sync::MutexGuard<'_, HashSet<DbId>> {
        self.pipelines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel every job of a project. Returns whether a token existed.
    pub async fn cancel_project(&self, project_id: DbId) -> bool {
        match self.tokens.read().await.get(&project_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
