//! Image generation: one image request per storyboard scene.
//!
//! Every attempt is recorded as a generated-image row, failed ones
//! included. Successful scenes are pre-staged into the video stage's input
//! so it can run without re-reading this stage's output.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use storyreel_backends::{ImageBackend, ImageOutput, ImageRequest};
use storyreel_core::error::CoreError;
use storyreel_core::records::{NewImage, OutputWrite, PayloadSlot, Project};
use storyreel_core::scene::{Scene, ScenePatch};
use storyreel_core::stage::StageType;
use storyreel_core::status::AssetStatus;
use tokio::sync::mpsc;

use super::{
    check_upstream, emit, mark_failed, resolve_provider, storyboard_scenes, unit_progress,
    StageProcessor,
};
use crate::context::{PipelineServices, StageContext};
use crate::event::{AssetKind, StageEvent, StageResult, UnitTally};
use crate::fanout::{ordered_units, UnitEvent, UnitOutcome};

const STAGE: StageType = StageType::ImageGeneration;

/// The prompt sent for a scene: its visual prompt, or the narration when
/// the storyboard left the visual prompt empty.
pub(crate) fn scene_prompt(scene: &Scene) -> &str {
    if scene.visual_prompt.trim().is_empty() {
        &scene.narration
    } else {
        &scene.visual_prompt
    }
}

pub struct ImageStageProcessor {
    services: PipelineServices,
}

impl ImageStageProcessor {
    pub fn new(services: PipelineServices) -> Self {
        Self { services }
    }

    async fn record(
        &self,
        project: &Project,
        scene: &Scene,
        provider: &str,
        result: Result<&ImageOutput, &str>,
    ) -> Result<(), CoreError> {
        let (status, url, width, height, error_message) = match result {
            Ok(output) => (
                AssetStatus::Completed,
                Some(output.url.clone()),
                i32::try_from(output.width).ok(),
                i32::try_from(output.height).ok(),
                None,
            ),
            Err(error) => (AssetStatus::Failed, None, None, None, Some(error.to_string())),
        };
        self.services
            .store
            .record_image(NewImage {
                project_id: project.id,
                sequence_number: scene.sequence_number,
                status,
                url,
                width,
                height,
                provider: provider.to_string(),
                prompt: scene_prompt(scene).to_string(),
                error_message,
                retry_count: 0,
            })
            .await?;
        Ok(())
    }

    /// Generate, record, and pre-stage one scene. Returns the image URLs.
    async fn image_unit(
        &self,
        project: &Project,
        provider: &str,
        backend: &dyn ImageBackend,
        scene: Scene,
    ) -> Result<Vec<String>, CoreError> {
        let request = ImageRequest {
            prompt: scene_prompt(&scene).to_string(),
            ratio: self.services.config.image_ratio.clone(),
            resolution: self.services.config.image_resolution.clone(),
            seed: Some(u64::from(rand::random::<u32>())),
        };

        let outputs = match backend.generate(&request).await {
            Ok(outputs) if !outputs.is_empty() => outputs,
            Ok(_) => {
                let error = "Backend returned no images";
                self.record(project, &scene, provider, Err(error)).await?;
                return Err(CoreError::Backend(error.into()));
            }
            Err(e) => {
                let error = CoreError::from(e);
                self.record(project, &scene, provider, Err(&error.to_string()))
                    .await?;
                return Err(error);
            }
        };

        for output in &outputs {
            self.record(project, &scene, provider, Ok(output)).await?;
        }
        let urls: Vec<String> = outputs.into_iter().map(|o| o.url).collect();

        self.services
            .store
            .merge_scenes(
                project.id,
                StageType::VideoGeneration,
                PayloadSlot::Input,
                &[ScenePatch::new(scene.sequence_number)
                    .set("image_urls", urls.clone())
                    .set("visual_prompt", scene.visual_prompt.clone())
                    .set("duration", scene.duration)],
            )
            .await?;
        Ok(urls)
    }

    async fn run(
        &self,
        ctx: &StageContext,
        events: &mpsc::Sender<StageEvent>,
    ) -> Result<StageEvent, CoreError> {
        let project = &ctx.project;
        let provider = resolve_provider(&self.services, project, STAGE).await?;
        let backend = self.services.backends.image(&provider)?;
        let scenes = storyboard_scenes(&self.services, project, ctx.selector.as_deref()).await?;
        if scenes.is_empty() {
            return Err(CoreError::Validation("No storyboard scenes to process".into()));
        }

        let limit = self.services.config.max_concurrent(STAGE);
        let mut tally = UnitTally::new(scenes.len());
        let mut patches = Vec::new();
        let mut cancelled = false;

        tracing::info!(
            project_id = project.id,
            scenes = tally.total,
            limit,
            provider = %provider.name,
            "Generating images"
        );

        let provider_name = provider.name.as_str();
        let backend = backend.as_ref();
        let mut units = ordered_units(scenes, limit, ctx.cancel.clone(), |scene| {
            self.image_unit(project, provider_name, backend, scene)
        });

        let total = tally.total;
        while let Some(event) = units.next().await {
            let (scene, result) = match event {
                UnitEvent::Started { index, item } => {
                    emit(events, unit_progress(index, total, item.sequence_number)).await;
                    continue;
                }
                UnitEvent::Finished {
                    outcome: UnitOutcome::Cancelled,
                    ..
                } => {
                    cancelled = true;
                    continue;
                }
                UnitEvent::Finished {
                    item,
                    outcome: UnitOutcome::Finished(result),
                    ..
                } => (item, result),
            };
            let number = scene.sequence_number;

            match result {
                Ok(urls) => {
                    tally.succeeded += 1;
                    patches.push(json!({ "sequence_number": number, "image_urls": urls }));
                    emit(
                        events,
                        StageEvent::AssetGenerated {
                            sequence_number: number,
                            kind: AssetKind::Image,
                            urls,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    tally.failed += 1;
                    tracing::warn!(project_id = project.id, sequence_number = number, error = %e, "Image generation failed");
                    emit(
                        events,
                        StageEvent::Warning {
                            message: format!("Scene {number}: {e}"),
                            sequence_number: Some(number),
                        },
                    )
                    .await;
                }
            }
        }
        drop(units);

        if cancelled {
            return Ok(StageEvent::Cancelled);
        }
        let Some(status) = tally.status() else {
            return Ok(StageEvent::Error(format!(
                "All {} image generations failed",
                tally.total
            )));
        };
        let mut output = tally.to_json();
        output["scenes"] = Value::Array(patches);
        Ok(StageEvent::Done(StageResult {
            status,
            output: OutputWrite::Merge(output),
            full_text: None,
            metadata: tally.to_json(),
        }))
    }
}

#[async_trait]
impl StageProcessor for ImageStageProcessor {
    fn stage(&self) -> StageType {
        STAGE
    }

    async fn check_preconditions(&self, project: &Project) -> Result<(), CoreError> {
        check_upstream(&self.services, project, STAGE).await?;
        resolve_provider(&self.services, project, STAGE).await?;
        if storyboard_scenes(&self.services, project, None).await?.is_empty() {
            return Err(CoreError::Validation("Storyboard has no scenes".into()));
        }
        Ok(())
    }

    async fn process_stream(&self, ctx: StageContext, events: mpsc::Sender<StageEvent>) {
        emit(&events, StageEvent::Info(format!("Starting {STAGE}"))).await;
        let terminal = self.run(&ctx, &events).await.unwrap_or_else(|e| {
            tracing::error!(project_id = ctx.project.id, error = %e, "Image stage failed");
            StageEvent::Error(e.to_string())
        });
        emit(&events, terminal).await;
    }

    async fn on_failure(&self, project: &Project, error: &str) {
        mark_failed(&self.services, project, STAGE, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_falls_back_to_narration() {
        let mut scene = Scene::new(1);
        scene.narration = "a fox runs".into();
        assert_eq!(scene_prompt(&scene), "a fox runs");
        scene.visual_prompt = "red fox, snow".into();
        assert_eq!(scene_prompt(&scene), "red fox, snow");
    }
}
