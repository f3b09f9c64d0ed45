//! Video generation: animate each scene's image with its camera movement.
//!
//! Scene membership comes from the storyboard. The source image is the one
//! the image stage pre-staged into this stage's input; rollback clears that
//! input, so images from before the last image run are never reused. A
//! scene without a pre-staged image may still use a completed image
//! recorded since the image stage last started. The camera movement is the
//! pre-staged one, falling back to the camera stage output. Scenes without
//! any image are reported with a warning in their turn and counted as
//! failures.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use storyreel_backends::{VideoBackend, VideoOutput, VideoRequest};
use storyreel_core::error::CoreError;
use storyreel_core::records::{NewVideo, OutputWrite, Project};
use storyreel_core::scene::{read_scenes, Scene};
use storyreel_core::stage::StageType;
use storyreel_core::status::AssetStatus;
use storyreel_core::types::Timestamp;
use storyreel_core::types::DbId;
use tokio::sync::mpsc;

use super::image::scene_prompt;
use super::{
    check_upstream, emit, mark_failed, resolve_provider, storyboard_scenes, unit_progress,
    StageProcessor,
};
use crate::context::{PipelineServices, StageContext};
use crate::event::{AssetKind, StageEvent, StageResult, UnitTally};
use crate::fanout::{ordered_units, UnitEvent, UnitOutcome};

const STAGE: StageType = StageType::VideoGeneration;

/// The image a clip is generated from.
#[derive(Debug, Clone, PartialEq)]
struct SourceImage {
    /// Set when the image comes from a generated-image record.
    id: Option<DbId>,
    url: String,
}

/// Everything needed to generate one scene's clip.
#[derive(Debug, Clone)]
struct VideoUnit {
    scene: Scene,
    image: Option<SourceImage>,
    camera_movement: Value,
}

/// Short textual form of a camera movement for the video prompt.
fn camera_hint(movement: &Value) -> Option<&str> {
    movement
        .get("movement_type")
        .or_else(|| movement.get("raw_text"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn video_prompt(unit: &VideoUnit) -> String {
    let base = scene_prompt(&unit.scene);
    match camera_hint(&unit.camera_movement) {
        Some(hint) => format!("{base}. Camera: {hint}"),
        None => base.to_string(),
    }
}

pub struct VideoStageProcessor {
    services: PipelineServices,
}

impl VideoStageProcessor {
    pub fn new(services: PipelineServices) -> Self {
        Self { services }
    }

    /// Resolve image and camera movement for every selected scene.
    async fn plan(
        &self,
        project: &Project,
        selector: Option<&[i32]>,
    ) -> Result<Vec<VideoUnit>, CoreError> {
        let scenes = storyboard_scenes(&self.services, project, selector).await?;
        let store = &self.services.store;

        let staged: HashMap<i32, Scene> = read_scenes(&store.get_stage(project.id, STAGE).await?.input)?
            .into_iter()
            .map(|s| (s.sequence_number, s))
            .collect();
        let camera: HashMap<i32, Value> =
            read_scenes(&store.get_stage(project.id, StageType::CameraMovement).await?.output)?
                .into_iter()
                .filter_map(|s| s.camera_movement.map(|m| (s.sequence_number, m)))
                .collect();

        let image_run_started = store
            .get_stage(project.id, StageType::ImageGeneration)
            .await?
            .started_at;
        let mut image_ids: HashMap<String, DbId> = HashMap::new();
        for image in store.list_images(project.id).await? {
            if image.status != AssetStatus::Completed {
                continue;
            }
            if let Some(url) = image.url {
                let id = image_ids.entry(url).or_insert(image.id);
                *id = (*id).max(image.id);
            }
        }

        let mut units = Vec::with_capacity(scenes.len());
        for scene in scenes {
            let number = scene.sequence_number;
            let pre_staged = staged.get(&number);

            let image = match pre_staged.and_then(|s| s.image_urls.last()) {
                Some(url) => Some(SourceImage {
                    id: image_ids.get(url).copied(),
                    url: url.clone(),
                }),
                None => self
                    .recent_image(project, number, image_run_started)
                    .await?,
            };

            let camera_movement = pre_staged
                .and_then(|s| s.camera_movement.clone())
                .or_else(|| camera.get(&number).cloned())
                .unwrap_or_else(|| json!({}));

            units.push(VideoUnit {
                scene,
                image,
                camera_movement,
            });
        }
        Ok(units)
    }

    /// Latest completed image of a scene, if it was generated by the current
    /// image run.
    async fn recent_image(
        &self,
        project: &Project,
        sequence_number: i32,
        since: Option<Timestamp>,
    ) -> Result<Option<SourceImage>, CoreError> {
        let Some(since) = since else {
            return Ok(None);
        };
        let image = self
            .services
            .store
            .latest_completed_image(project.id, sequence_number)
            .await?;
        Ok(image
            .filter(|image| image.created_at >= since)
            .and_then(|image| {
                image.url.map(|url| SourceImage {
                    id: Some(image.id),
                    url,
                })
            }))
    }

    async fn record(
        &self,
        project: &Project,
        unit: &VideoUnit,
        image_id: Option<DbId>,
        provider: &str,
        result: Result<&VideoOutput, &str>,
    ) -> Result<(), CoreError> {
        let (status, url, width, height, duration, fps, error_message) = match result {
            Ok(output) => (
                AssetStatus::Completed,
                Some(output.url.clone()),
                i32::try_from(output.width).ok(),
                i32::try_from(output.height).ok(),
                Some(output.duration),
                i32::try_from(output.fps).ok(),
                None,
            ),
            Err(error) => (
                AssetStatus::Failed,
                None,
                None,
                None,
                None,
                None,
                Some(error.to_string()),
            ),
        };
        self.services
            .store
            .record_video(NewVideo {
                project_id: project.id,
                sequence_number: unit.scene.sequence_number,
                image_id,
                camera_movement: unit.camera_movement.clone(),
                status,
                url,
                width,
                height,
                duration,
                fps,
                provider: provider.to_string(),
                prompt: video_prompt(unit),
                error_message,
                retry_count: 0,
            })
            .await?;
        Ok(())
    }

    async fn video_unit(
        &self,
        project: &Project,
        provider: &str,
        backend: &dyn VideoBackend,
        unit: VideoUnit,
    ) -> Result<Vec<String>, CoreError> {
        let Some(image) = unit.image.clone() else {
            return Err(CoreError::Validation("no image available, skipped".into()));
        };
        let request = VideoRequest {
            prompt: video_prompt(&unit),
            image_url: image.url,
            camera_movement: unit.camera_movement.clone(),
            duration: unit.scene.duration,
        };

        let outputs = match backend.generate(&request).await {
            Ok(outputs) if !outputs.is_empty() => outputs,
            Ok(_) => {
                let error = "Backend returned no videos";
                self.record(project, &unit, image.id, provider, Err(error)).await?;
                return Err(CoreError::Backend(error.into()));
            }
            Err(e) => {
                let error = CoreError::from(e);
                self.record(project, &unit, image.id, provider, Err(&error.to_string()))
                    .await?;
                return Err(error);
            }
        };

        for output in &outputs {
            self.record(project, &unit, image.id, provider, Ok(output))
                .await?;
        }
        Ok(outputs.into_iter().map(|o| o.url).collect())
    }

    async fn run(
        &self,
        ctx: &StageContext,
        events: &mpsc::Sender<StageEvent>,
    ) -> Result<StageEvent, CoreError> {
        let project = &ctx.project;
        let provider = resolve_provider(&self.services, project, STAGE).await?;
        let backend = self.services.backends.video(&provider)?;
        let plan = self.plan(project, ctx.selector.as_deref()).await?;
        if plan.is_empty() {
            return Err(CoreError::Validation("No storyboard scenes to process".into()));
        }

        let limit = self.services.config.max_concurrent(STAGE);
        let mut tally = UnitTally::new(plan.len());
        let mut patches = Vec::new();
        let mut cancelled = false;

        tracing::info!(
            project_id = project.id,
            scenes = tally.total,
            without_image = plan.iter().filter(|u| u.image.is_none()).count(),
            limit,
            provider = %provider.name,
            "Generating videos"
        );

        let provider_name = provider.name.as_str();
        let backend = backend.as_ref();
        let mut units = ordered_units(plan, limit, ctx.cancel.clone(), |unit| {
            self.video_unit(project, provider_name, backend, unit)
        });

        let total = tally.total;
        while let Some(event) = units.next().await {
            let (unit, result) = match event {
                UnitEvent::Started { index, item } => {
                    emit(events, unit_progress(index, total, item.scene.sequence_number)).await;
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
            let number = unit.scene.sequence_number;

            match result {
                Ok(urls) => {
                    tally.succeeded += 1;
                    patches.push(json!({ "sequence_number": number, "video_urls": urls }));
                    emit(
                        events,
                        StageEvent::AssetGenerated {
                            sequence_number: number,
                            kind: AssetKind::Video,
                            urls,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    tally.failed += 1;
                    tracing::warn!(project_id = project.id, sequence_number = number, error = %e, "Video generation failed");
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
                "All {} video generations failed",
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
impl StageProcessor for VideoStageProcessor {
    fn stage(&self) -> StageType {
        STAGE
    }

    async fn check_preconditions(&self, project: &Project) -> Result<(), CoreError> {
        check_upstream(&self.services, project, STAGE).await?;
        resolve_provider(&self.services, project, STAGE).await?;
        let plan = self.plan(project, None).await?;
        if !plan.iter().any(|u| u.image.is_some()) {
            return Err(CoreError::Validation("No scene has an image to animate".into()));
        }
        Ok(())
    }

    async fn process_stream(&self, ctx: StageContext, events: mpsc::Sender<StageEvent>) {
        emit(&events, StageEvent::Info(format!("Starting {STAGE}"))).await;
        let terminal = self.run(&ctx, &events).await.unwrap_or_else(|e| {
            tracing::error!(project_id = ctx.project.id, error = %e, "Video stage failed");
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

    fn unit(camera_movement: Value) -> VideoUnit {
        let mut scene = Scene::new(2);
        scene.visual_prompt = "lighthouse at dusk".into();
        VideoUnit {
            scene,
            image: None,
            camera_movement,
        }
    }

    #[test]
    fn prompt_includes_movement_type() {
        let prompt = video_prompt(&unit(json!({"movement_type": "pan_left"})));
        assert_eq!(prompt, "lighthouse at dusk. Camera: pan_left");
    }

    #[test]
    fn prompt_uses_raw_text_fallback() {
        let prompt = video_prompt(&unit(json!({"raw_text": "slow push in"})));
        assert_eq!(prompt, "lighthouse at dusk. Camera: slow push in");
    }

    #[test]
    fn prompt_without_camera_is_scene_prompt() {
        assert_eq!(video_prompt(&unit(json!({}))), "lighthouse at dusk");
    }
}
