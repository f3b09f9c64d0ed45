//! Task dispatcher: runs one claimed stage and owns its terminal write.
//!
//! The processor runs in its own task and streams [`StageEvent`]s over a
//! bounded queue. The dispatcher is the only consumer: it forwards
//! intermediate events to the progress channel and, on the terminal event,
//! writes the stage record exactly once before publishing the terminal
//! message. No automatic retry is performed on failure.

use std::sync::Arc;

use serde_json::Value;
use storyreel_core::error::CoreError;
use storyreel_core::records::{Project, StageRecord};
use storyreel_core::stage::StageType;
use storyreel_core::status::StageStatus;
use storyreel_core::types::DbId;
use storyreel_events::{MessageKind, Publisher};
use storyreel_pipeline::{processor_for, PipelineServices, StageContext, StageEvent, StageResult};
use tokio::sync::mpsc;

/// Error recorded when a run is stopped by its cancellation token.
pub const CANCELLED_ERROR: &str = "cancelled";

/// How a dispatched stage ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// `Completed` or `PartiallyCompleted`.
    Succeeded(StageStatus),
    Failed(String),
    Cancelled,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Translate a non-terminal processor event into its channel message.
fn to_message(event: StageEvent) -> Option<MessageKind> {
    let kind = match event {
        StageEvent::Info(message) => MessageKind::Info { message },
        StageEvent::Token { content, full_text } => MessageKind::Token { content, full_text },
        StageEvent::Progress {
            current,
            total,
            item_name,
        } => MessageKind::progress(current, total, item_name),
        StageEvent::AssetGenerated {
            sequence_number,
            kind,
            urls,
        } => MessageKind::AssetGenerated {
            sequence_number,
            asset_kind: kind.as_str().to_string(),
            urls,
        },
        StageEvent::Warning {
            message,
            sequence_number,
        } => MessageKind::Warning {
            message,
            sequence_number,
        },
        StageEvent::Done(_) | StageEvent::Error(_) | StageEvent::Cancelled => return None,
    };
    Some(kind)
}

pub struct TaskDispatcher {
    services: PipelineServices,
    event_buffer: usize,
}

impl TaskDispatcher {
    pub fn new(services: PipelineServices, event_buffer: usize) -> Self {
        Self {
            services,
            event_buffer: event_buffer.max(1),
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    /// Atomically move the stage to `processing` and announce it.
    ///
    /// An `input` override is stored by the same write as the claim.
    /// Fails with [`CoreError::Conflict`] if the stage is already running,
    /// cannot be re-entered, or has no retries left.
    pub async fn claim(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
        publisher: &Publisher,
    ) -> Result<StageRecord, CoreError> {
        let record = self.services.store.claim_stage(project_id, stage, input).await?;
        publisher.send_for_stage(
            stage,
            MessageKind::StageUpdate {
                status: StageStatus::Processing.to_string(),
                progress: Some(0.0),
                message: None,
            },
        );
        tracing::info!(project_id, stage = %stage, "Stage claimed");
        Ok(record)
    }

    /// Run a claimed stage to completion.
    ///
    /// Every path ends with the stage record in a terminal status and one
    /// terminal message (`done` or `error`) published for the stage.
    pub async fn run_claimed(&self, ctx: StageContext, publisher: &Publisher) -> StageOutcome {
        let stage = ctx.stage;
        let project = ctx.project.clone();
        let processor = processor_for(stage, self.services.clone());

        let (tx, mut rx) = mpsc::channel(self.event_buffer);
        let task = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.process_stream(ctx, tx).await })
        };

        let mut outcome = None;
        while let Some(event) = rx.recv().await {
            match event {
                StageEvent::Done(result) => {
                    outcome = Some(self.finish_done(&project, stage, result, publisher).await);
                    break;
                }
                StageEvent::Error(error) => {
                    outcome = Some(self.finish_failed(&project, stage, &error, true, publisher).await);
                    break;
                }
                StageEvent::Cancelled => {
                    self.finish_failed(&project, stage, CANCELLED_ERROR, false, publisher)
                        .await;
                    outcome = Some(StageOutcome::Cancelled);
                    break;
                }
                event => {
                    if let Some(kind) = to_message(event) {
                        publisher.send_for_stage(stage, kind);
                    }
                }
            }
        }
        drop(rx);

        let joined = task.await;
        if let Some(outcome) = outcome {
            return outcome;
        }

        // The processor died or returned without a terminal event.
        let error = match joined {
            Err(e) if e.is_panic() => format!("Stage processor for {stage} panicked"),
            Err(e) => format!("Stage processor for {stage} was aborted: {e}"),
            Ok(()) => format!("Stage processor for {stage} ended without a result"),
        };
        tracing::error!(project_id = project.id, stage = %stage, error = %error, "Stage run ended abnormally");
        processor.on_failure(&project, &error).await;
        let retry_count = match self.services.store.get_stage(project.id, stage).await {
            Ok(record) => record.retry_count,
            Err(_) => 0,
        };
        publisher.send_for_stage(
            stage,
            MessageKind::Error {
                error: error.clone(),
                retry_count,
            },
        );
        StageOutcome::Failed(error)
    }

    async fn finish_done(
        &self,
        project: &Project,
        stage: StageType,
        result: StageResult,
        publisher: &Publisher,
    ) -> StageOutcome {
        let StageResult {
            status,
            output,
            full_text,
            metadata,
        } = result;

        let record = match self
            .services
            .store
            .complete_stage(project.id, stage, status, output)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let error = format!("Failed to store {stage} result: {e}");
                return self.finish_failed(project, stage, &error, true, publisher).await;
            }
        };

        publisher.send_for_stage(
            stage,
            MessageKind::Done {
                full_text,
                metadata: Some(metadata.clone()),
            },
        );
        publisher.send_for_stage(
            stage,
            MessageKind::StageCompleted {
                status: record.status.to_string(),
                metadata: Some(metadata),
            },
        );
        tracing::info!(project_id = project.id, stage = %stage, status = %record.status, "Stage finished");
        StageOutcome::Succeeded(record.status)
    }

    async fn finish_failed(
        &self,
        project: &Project,
        stage: StageType,
        error: &str,
        count_retry: bool,
        publisher: &Publisher,
    ) -> StageOutcome {
        let retry_count = match self
            .services
            .store
            .fail_stage(project.id, stage, error, count_retry)
            .await
        {
            Ok(record) => record.retry_count,
            Err(e) => {
                tracing::error!(
                    project_id = project.id,
                    stage = %stage,
                    error = %e,
                    "Failed to mark stage failed",
                );
                0
            }
        };
        publisher.send_for_stage(
            stage,
            MessageKind::Error {
                error: error.to_string(),
                retry_count,
            },
        );
        tracing::warn!(project_id = project.id, stage = %stage, error, retry_count, "Stage failed");
        StageOutcome::Failed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_pipeline::AssetKind;

    #[test]
    fn terminal_events_have_no_message() {
        assert_eq!(to_message(StageEvent::Cancelled), None);
        assert_eq!(to_message(StageEvent::Error("x".into())), None);
    }

    #[test]
    fn progress_gets_percentage() {
        let kind = to_message(StageEvent::Progress {
            current: 1,
            total: 3,
            item_name: "scene 1".into(),
        });
        assert_eq!(
            kind,
            Some(MessageKind::Progress {
                current: 1,
                total: 3,
                progress: 33.3,
                item_name: "scene 1".into(),
            })
        );
    }

    #[test]
    fn asset_kind_is_named() {
        let kind = to_message(StageEvent::AssetGenerated {
            sequence_number: 2,
            kind: AssetKind::CameraMovement,
            urls: vec![],
        });
        assert!(matches!(
            kind,
            Some(MessageKind::AssetGenerated { asset_kind, .. }) if asset_kind == "camera_movement"
        ));
    }
}
