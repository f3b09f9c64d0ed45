//! Text-generation stages: rewrite, storyboard, and camera movement.
//!
//! Rewrite and storyboard are single-document units whose tokens are
//! forwarded as they stream in. Camera movement runs one prompt per
//! storyboard scene and pre-stages each parsed movement into the video
//! stage's input.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use storyreel_backends::{TextBackend, TextRequest};
use storyreel_core::catalog::default_template_body;
use storyreel_core::error::CoreError;
use storyreel_core::records::{OutputWrite, PayloadSlot, Project};
use storyreel_core::scene::{read_scenes, Scene, ScenePatch};
use storyreel_core::stage::{Sampling, StageType};
use storyreel_core::status::StageStatus;
use storyreel_core::storyboard::{parse_camera_movement, parse_storyboard};
use storyreel_core::template::TemplateVars;
use tokio::sync::mpsc;

use super::{
    check_upstream, emit, mark_failed, resolve_provider, storyboard_scenes, unit_progress,
    StageProcessor,
};
use crate::context::{PipelineServices, StageContext};
use crate::event::{StageEvent, StageResult, UnitTally};
use crate::fanout::{ordered_units, UnitEvent, UnitOutcome};

/// Used when a stage has no sampling defaults of its own.
const FALLBACK_SAMPLING: Sampling = Sampling {
    temperature: 0.7,
    max_tokens: 2000,
};

pub struct TextStageProcessor {
    stage: StageType,
    services: PipelineServices,
}

impl TextStageProcessor {
    pub fn new(stage: StageType, services: PipelineServices) -> Self {
        Self { stage, services }
    }

    /// Render the stage template as the system prompt.
    ///
    /// Variables are layered globals, then `project`, then the stage input,
    /// then `scene` for per-scene units.
    async fn system_prompt(
        &self,
        project: &Project,
        input: &Value,
        scene: Option<&Scene>,
    ) -> Result<String, CoreError> {
        let body = match self.services.catalog.template(self.stage).await? {
            Some(template) => template.body,
            None => default_template_body(self.stage)
                .map(str::to_string)
                .ok_or_else(|| {
                    CoreError::Configuration(format!("No prompt template for stage {}", self.stage))
                })?,
        };
        let globals = self.services.catalog.global_variables().await?;
        let mut vars = TemplateVars::new()
            .layer(&globals)
            .set("project", project.template_metadata())
            .layer(input);
        if let Some(scene) = scene {
            let scene = serde_json::to_value(scene)
                .map_err(|e| CoreError::Internal(format!("Scene serialization failed: {e}")))?;
            vars = vars.set("scene", scene);
        }
        self.services.renderer.render(&body, &vars.into_value())
    }

    fn request(&self, system_prompt: String, user_prompt: String) -> TextRequest {
        let sampling = self.stage.sampling().unwrap_or(FALLBACK_SAMPLING);
        TextRequest {
            stage: self.stage,
            system_prompt,
            user_prompt,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
        }
    }

    /// The user prompt of a single-document stage.
    ///
    /// An operator-supplied `raw_text` in the stage input takes precedence.
    async fn document_input(&self, project: &Project, input: &Value) -> Result<String, CoreError> {
        if let Some(text) = input.get("raw_text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Ok(text.to_string());
            }
        }
        match self.stage {
            StageType::Rewrite => Ok(project.original_topic.clone()),
            _ => {
                let rewrite = self
                    .services
                    .store
                    .get_stage(project.id, StageType::Rewrite)
                    .await?;
                rewrite
                    .output
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.trim().is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::Validation("Rewrite output has no text".into()))
            }
        }
    }

    /// Stream one generation, forwarding every chunk as a token event.
    async fn stream_unit(
        &self,
        backend: &dyn TextBackend,
        request: &TextRequest,
        events: &mpsc::Sender<StageEvent>,
    ) -> Result<String, CoreError> {
        let mut tokens = backend.stream(request).await?;
        let mut full = String::new();
        while let Some(chunk) = tokens.next().await {
            let chunk = chunk?;
            full.push_str(&chunk);
            emit(
                events,
                StageEvent::Token {
                    content: chunk,
                    full_text: full.clone(),
                },
            )
            .await;
        }
        if full.trim().is_empty() {
            return Err(CoreError::Backend("Backend returned empty text".into()));
        }
        Ok(full)
    }

    // ---- single-document stages ----

    async fn run_document(
        &self,
        ctx: &StageContext,
        events: &mpsc::Sender<StageEvent>,
    ) -> Result<StageEvent, CoreError> {
        let project = &ctx.project;
        let record = self.services.store.get_stage(project.id, self.stage).await?;
        let provider = resolve_provider(&self.services, project, self.stage).await?;
        let backend = self.services.backends.text(&provider)?;
        let system_prompt = self.system_prompt(project, &record.input, None).await?;
        let user_prompt = self.document_input(project, &record.input).await?;

        if ctx.cancel.is_cancelled() {
            return Ok(StageEvent::Cancelled);
        }
        emit(
            events,
            StageEvent::Progress {
                current: 1,
                total: 1,
                item_name: self.stage.as_str().to_string(),
            },
        )
        .await;

        let request = self.request(system_prompt, user_prompt);
        let full = self.stream_unit(backend.as_ref(), &request, events).await?;
        tracing::info!(
            project_id = project.id,
            stage = %self.stage,
            provider = %provider.name,
            chars = full.chars().count(),
            "Text generation finished"
        );

        let (output, metadata) = match self.stage {
            StageType::Storyboard => match parse_storyboard(&full) {
                Ok(scenes) => (
                    json!({ "scenes": scenes }),
                    json!({ "scene_count": scenes.len(), "provider": provider.name }),
                ),
                Err(e) => {
                    tracing::warn!(project_id = project.id, error = %e, "Storyboard parse failed, keeping raw text");
                    emit(
                        events,
                        StageEvent::Warning {
                            message: format!("Storyboard could not be parsed, raw text kept: {e}"),
                            sequence_number: None,
                        },
                    )
                    .await;
                    (
                        json!({ "raw_text": full, "scenes": [] }),
                        json!({ "scene_count": 0, "parse_error": e.to_string(), "provider": provider.name }),
                    )
                }
            },
            _ => (
                json!({ "text": full }),
                json!({ "length": full.chars().count(), "provider": provider.name }),
            ),
        };

        Ok(StageEvent::Done(StageResult {
            status: StageStatus::Completed,
            output: OutputWrite::Replace(output),
            full_text: Some(full),
            metadata,
        }))
    }

    // ---- camera movement ----

    async fn camera_unit(
        &self,
        project: &Project,
        input: &Value,
        backend: &dyn TextBackend,
        scene: Scene,
    ) -> Result<(String, Value), CoreError> {
        let system_prompt = self.system_prompt(project, input, Some(&scene)).await?;
        let user_prompt = format!(
            "Scene {}\nVisual: {}\nShot type: {}\nNarration: {}",
            scene.sequence_number, scene.visual_prompt, scene.shot_type, scene.narration
        );
        let text = backend
            .complete(&self.request(system_prompt, user_prompt))
            .await?;
        let movement = parse_camera_movement(&text);

        self.services
            .store
            .merge_scenes(
                project.id,
                StageType::VideoGeneration,
                PayloadSlot::Input,
                &[ScenePatch::new(scene.sequence_number).set("camera_movement", movement.clone())],
            )
            .await?;
        Ok((text, movement))
    }

    async fn run_camera(
        &self,
        ctx: &StageContext,
        events: &mpsc::Sender<StageEvent>,
    ) -> Result<StageEvent, CoreError> {
        let project = &ctx.project;
        let record = self.services.store.get_stage(project.id, self.stage).await?;
        let provider = resolve_provider(&self.services, project, self.stage).await?;
        let backend = self.services.backends.text(&provider)?;
        let scenes = storyboard_scenes(&self.services, project, ctx.selector.as_deref()).await?;
        if scenes.is_empty() {
            return Err(CoreError::Validation("No storyboard scenes to process".into()));
        }

        let limit = self.services.config.max_concurrent(self.stage);
        let mut tally = UnitTally::new(scenes.len());
        let mut patches = Vec::new();
        let mut transcript = String::new();
        let mut cancelled = false;

        let input = &record.input;
        let backend = backend.as_ref();
        let mut units = ordered_units(scenes, limit, ctx.cancel.clone(), |scene| {
            self.camera_unit(project, input, backend, scene)
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
                Ok((text, movement)) => {
                    tally.succeeded += 1;
                    transcript.push_str(&text);
                    transcript.push('\n');
                    emit(
                        events,
                        StageEvent::Token {
                            content: text,
                            full_text: transcript.clone(),
                        },
                    )
                    .await;
                    patches.push(json!({ "sequence_number": number, "camera_movement": movement }));
                }
                Err(e) => {
                    tally.failed += 1;
                    tracing::warn!(project_id = project.id, sequence_number = number, error = %e, "Camera movement generation failed");
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
                "All {} camera movement generations failed",
                tally.total
            )));
        };
        let mut output = tally.to_json();
        output["scenes"] = Value::Array(patches);
        Ok(StageEvent::Done(StageResult {
            status,
            output: OutputWrite::Merge(output),
            full_text: Some(transcript),
            metadata: tally.to_json(),
        }))
    }
}

#[async_trait]
impl StageProcessor for TextStageProcessor {
    fn stage(&self) -> StageType {
        self.stage
    }

    async fn check_preconditions(&self, project: &Project) -> Result<(), CoreError> {
        check_upstream(&self.services, project, self.stage).await?;
        resolve_provider(&self.services, project, self.stage).await?;

        match self.stage {
            StageType::Storyboard => {
                let input = self.services.store.get_stage(project.id, self.stage).await?.input;
                self.document_input(project, &input).await?;
            }
            StageType::CameraMovement => {
                let record = self
                    .services
                    .store
                    .get_stage(project.id, StageType::Storyboard)
                    .await?;
                if read_scenes(&record.output)?.is_empty() {
                    return Err(CoreError::Validation("Storyboard has no scenes".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn process_stream(&self, ctx: StageContext, events: mpsc::Sender<StageEvent>) {
        emit(&events, StageEvent::Info(format!("Starting {}", self.stage))).await;

        let terminal = match self.stage {
            StageType::CameraMovement => self.run_camera(&ctx, &events).await,
            _ => self.run_document(&ctx, &events).await,
        };
        let terminal = terminal.unwrap_or_else(|e| {
            tracing::error!(project_id = ctx.project.id, stage = %self.stage, error = %e, "Text stage failed");
            StageEvent::Error(e.to_string())
        });
        emit(&events, terminal).await;
    }

    async fn on_failure(&self, project: &Project, error: &str) {
        mark_failed(&self.services, project, self.stage, error).await;
    }
}
