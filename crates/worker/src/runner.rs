//! Pipeline runner: executes the five stages in order for one project.

use std::sync::Arc;

use serde_json::json;
use storyreel_core::error::CoreError;
use storyreel_core::records::Project;
use storyreel_core::stage::{StageType, STAGE_ORDER};
use storyreel_core::status::{ProjectStatus, StageStatus};
use storyreel_events::{MessageKind, Publisher};
use storyreel_pipeline::{processor_for, StageContext};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{StageOutcome, TaskDispatcher};

/// Result of a full pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSummary {
    pub executed: Vec<StageType>,
    pub skipped: Vec<StageType>,
    /// The stage that stopped the run and why.
    pub failure: Option<(StageType, String)>,
    pub cancelled: bool,
}

impl PipelineSummary {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

fn names(stages: &[StageType]) -> Vec<&'static str> {
    stages.iter().map(|s| s.as_str()).collect()
}

pub struct PipelineRunner {
    dispatcher: Arc<TaskDispatcher>,
}

impl PipelineRunner {
    pub fn new(dispatcher: Arc<TaskDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Run every stage that is not already `completed`, stopping at the
    /// first one that does not succeed.
    ///
    /// Publishes `pipeline_done` or `pipeline_error` on `publisher` and moves
    /// the project out of `processing` accordingly. A paused project keeps
    /// its status.
    pub async fn run(
        &self,
        project: Project,
        cancel: CancellationToken,
        publisher: &Publisher,
    ) -> PipelineSummary {
        let mut summary = PipelineSummary {
            executed: Vec::new(),
            skipped: Vec::new(),
            failure: None,
            cancelled: false,
        };
        tracing::info!(project_id = project.id, "Pipeline run started");

        for stage in STAGE_ORDER {
            match self.run_stage(&project, stage, &cancel, publisher).await {
                Ok(Some(StageOutcome::Succeeded(_))) => summary.executed.push(stage),
                Ok(None) => summary.skipped.push(stage),
                Ok(Some(StageOutcome::Cancelled)) => {
                    summary.cancelled = true;
                    summary.failure = Some((stage, "cancelled".into()));
                    break;
                }
                Ok(Some(StageOutcome::Failed(error))) => {
                    summary.failure = Some((stage, error));
                    break;
                }
                Err(e) => {
                    publisher.send_for_stage(
                        stage,
                        MessageKind::Error {
                            error: e.to_string(),
                            retry_count: 0,
                        },
                    );
                    summary.failure = Some((stage, e.to_string()));
                    break;
                }
            }
        }

        self.finish(&project, &summary, publisher).await;
        summary
    }

    /// `Ok(None)` means the stage was skipped.
    async fn run_stage(
        &self,
        project: &Project,
        stage: StageType,
        cancel: &CancellationToken,
        publisher: &Publisher,
    ) -> Result<Option<StageOutcome>, CoreError> {
        if cancel.is_cancelled() {
            return Ok(Some(StageOutcome::Cancelled));
        }

        let services = self.dispatcher.services();
        let record = services.store.get_stage(project.id, stage).await?;
        if record.status == StageStatus::Completed {
            publisher.send_for_stage(
                stage,
                MessageKind::Info {
                    message: format!("Skipping {stage}: already completed"),
                },
            );
            return Ok(None);
        }

        processor_for(stage, services.clone())
            .check_preconditions(project)
            .await?;
        self.dispatcher.claim(project.id, stage, None, publisher).await?;

        let ctx = StageContext::new(project.clone(), stage).with_cancel(cancel.clone());
        Ok(Some(self.dispatcher.run_claimed(ctx, publisher).await))
    }

    async fn finish(&self, project: &Project, summary: &PipelineSummary, publisher: &Publisher) {
        let store = &self.dispatcher.services().store;
        let next = if summary.succeeded() {
            ProjectStatus::Completed
        } else {
            ProjectStatus::Failed
        };
        if let Err(e) = store
            .transition_project_status(project.id, ProjectStatus::Processing, next)
            .await
        {
            tracing::debug!(project_id = project.id, error = %e, "Project status left unchanged");
        }

        match &summary.failure {
            None => {
                tracing::info!(
                    project_id = project.id,
                    executed = summary.executed.len(),
                    skipped = summary.skipped.len(),
                    "Pipeline run completed"
                );
                publisher.send(MessageKind::PipelineDone {
                    metadata: json!({
                        "completed_stages": names(&summary.executed),
                        "skipped_stages": names(&summary.skipped),
                        "total_stages": STAGE_ORDER.len(),
                    }),
                });
            }
            Some((stage, error)) => {
                tracing::warn!(project_id = project.id, stage = %stage, error = %error, "Pipeline run aborted");
                publisher.send(MessageKind::PipelineError {
                    error: format!("Stage {stage} failed: {error}"),
                    failed_stage: Some(stage.as_str().to_string()),
                });
            }
        }
    }
}
