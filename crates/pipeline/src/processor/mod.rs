//! The stage processor contract and the checks its variants share.

pub mod image;
pub mod text;
pub mod video;

use std::sync::Arc;

use async_trait::async_trait;
use storyreel_core::error::CoreError;
use storyreel_core::records::{Project, ProviderConfig};
use storyreel_core::scene::{read_scenes, select_scenes, Scene};
use storyreel_core::stage::StageType;
use tokio::sync::mpsc;

use crate::context::{PipelineServices, StageContext};
use crate::event::StageEvent;

use self::image::ImageStageProcessor;
use self::text::TextStageProcessor;
use self::video::VideoStageProcessor;

#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn stage(&self) -> StageType;

    /// Check every precondition, reporting the first one that is unmet.
    ///
    /// Covers upstream stage status, provider resolution, and non-empty
    /// input collections.
    async fn check_preconditions(&self, project: &Project) -> Result<(), CoreError>;

    /// Whether the stage may start. Never fails; use
    /// [`check_preconditions`](Self::check_preconditions) to learn why not.
    async fn validate(&self, project: &Project) -> bool {
        self.check_preconditions(project).await.is_ok()
    }

    /// Run the stage, sending events to `events` in emission order.
    ///
    /// Always ends with exactly one terminal event unless the receiver goes
    /// away. Expected failures are reported as events, never as panics.
    async fn process_stream(&self, ctx: StageContext, events: mpsc::Sender<StageEvent>);

    /// Mark the stage failed after an error outside the event stream.
    ///
    /// Safe to call more than once.
    async fn on_failure(&self, project: &Project, error: &str);
}

/// Build the processor variant serving `stage`.
pub fn processor_for(stage: StageType, services: PipelineServices) -> Arc<dyn StageProcessor> {
    match stage {
        StageType::Rewrite | StageType::Storyboard | StageType::CameraMovement => {
            Arc::new(TextStageProcessor::new(stage, services))
        }
        StageType::ImageGeneration => Arc::new(ImageStageProcessor::new(services)),
        StageType::VideoGeneration => Arc::new(VideoStageProcessor::new(services)),
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Fail unless every upstream stage of `stage` can be consumed.
pub(crate) async fn check_upstream(
    services: &PipelineServices,
    project: &Project,
    stage: StageType,
) -> Result<(), CoreError> {
    for upstream in stage.upstream() {
        let record = services.store.get_stage(project.id, *upstream).await?;
        if !record.status.satisfies_dependency() {
            return Err(CoreError::Validation(format!(
                "Upstream stage {upstream} is {}, {stage} needs it completed",
                record.status
            )));
        }
    }
    Ok(())
}

/// Resolve the provider configured for `stage`.
pub(crate) async fn resolve_provider(
    services: &PipelineServices,
    project: &Project,
    stage: StageType,
) -> Result<ProviderConfig, CoreError> {
    services.providers.resolve(project, stage).await
}

/// Storyboard scenes of the project, narrowed by the selector.
pub(crate) async fn storyboard_scenes(
    services: &PipelineServices,
    project: &Project,
    selector: Option<&[i32]>,
) -> Result<Vec<Scene>, CoreError> {
    let record = services
        .store
        .get_stage(project.id, StageType::Storyboard)
        .await?;
    Ok(select_scenes(read_scenes(&record.output)?, selector))
}

/// Send an event. A closed receiver means nobody consumes the run any more,
/// so the event is dropped.
pub(crate) async fn emit(events: &mpsc::Sender<StageEvent>, event: StageEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("Stage event receiver closed, dropping event");
    }
}

/// Progress event for a unit that is about to run. `index` is 0-based.
pub(crate) fn unit_progress(index: usize, total: usize, sequence_number: i32) -> StageEvent {
    StageEvent::Progress {
        current: index + 1,
        total,
        item_name: format!("scene {sequence_number}"),
    }
}

/// Shared `on_failure` body: fail the record, never propagate.
pub(crate) async fn mark_failed(
    services: &PipelineServices,
    project: &Project,
    stage: StageType,
    error: &str,
) {
    if let Err(e) = services.store.fail_stage(project.id, stage, error, true).await {
        tracing::error!(
            project_id = project.id,
            stage = %stage,
            error = %e,
            "Failed to record stage failure"
        );
    }
}
