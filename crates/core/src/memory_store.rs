//! In-process [`PipelineStore`] backed by a single `RwLock`.
//!
//! Every mutation takes the write lock for its whole read-modify-write, so
//! each trait method is atomic with respect to every other. Used by tests
//! and by the API server when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::records::{
    GeneratedImage, GeneratedVideo, NewImage, NewProject, NewVideo, OutputWrite, PayloadSlot,
    Project, StageRecord, DEFAULT_MAX_RETRIES,
};
use crate::scene::{merge_payload, ScenePatch};
use crate::stage::{StageType, STAGE_ORDER};
use crate::status::{AssetStatus, ProjectStatus, StageStatus};
use crate::store::PipelineStore;
use crate::types::DbId;

#[derive(Default)]
struct Inner {
    next_id: DbId,
    projects: HashMap<DbId, Project>,
    stages: HashMap<(DbId, StageType), StageRecord>,
    images: Vec<GeneratedImage>,
    videos: Vec<GeneratedVideo>,
}

impl Inner {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn project_mut(&mut self, id: DbId) -> Result<&mut Project, CoreError> {
        self.projects
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("project", id))
    }

    fn stage_mut(
        &mut self,
        project_id: DbId,
        stage: StageType,
    ) -> Result<&mut StageRecord, CoreError> {
        self.stages
            .get_mut(&(project_id, stage))
            .ok_or_else(|| CoreError::not_found("stage", format!("{project_id}/{stage}")))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn create_project(&self, new: NewProject) -> Result<Project, CoreError> {
        if new.original_topic.trim().is_empty() {
            return Err(CoreError::Validation("Topic must not be empty".into()));
        }
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let id = inner.next_id();
        let project = Project {
            id,
            name: new.name,
            description: new.description,
            original_topic: new.original_topic,
            status: ProjectStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        inner.projects.insert(id, project.clone());

        let max_retries = new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        for stage in STAGE_ORDER {
            let stage_id = inner.next_id();
            inner.stages.insert(
                (id, stage),
                StageRecord {
                    id: stage_id,
                    project_id: id,
                    stage,
                    status: StageStatus::Pending,
                    input: json!({}),
                    output: json!({}),
                    retry_count: 0,
                    max_retries,
                    error_message: None,
                    started_at: None,
                    completed_at: None,
                    updated_at: now,
                },
            );
        }
        Ok(project)
    }

    async fn get_project(&self, id: DbId) -> Result<Project, CoreError> {
        self.inner
            .read()
            .await
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("project", id))
    }

    async fn set_project_status(
        &self,
        id: DbId,
        status: ProjectStatus,
    ) -> Result<Project, CoreError> {
        let mut inner = self.inner.write().await;
        let project = inner.project_mut(id)?;
        project.status = status;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn transition_project_status(
        &self,
        id: DbId,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<Project, CoreError> {
        let mut inner = self.inner.write().await;
        let project = inner.project_mut(id)?;
        if project.status != from {
            return Err(CoreError::Conflict(format!(
                "Project {id} is {}, expected {from}",
                project.status
            )));
        }
        project.status = to;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn get_stage(
        &self,
        project_id: DbId,
        stage: StageType,
    ) -> Result<StageRecord, CoreError> {
        self.inner
            .read()
            .await
            .stages
            .get(&(project_id, stage))
            .cloned()
            .ok_or_else(|| CoreError::not_found("stage", format!("{project_id}/{stage}")))
    }

    async fn list_stages(&self, project_id: DbId) -> Result<Vec<StageRecord>, CoreError> {
        let inner = self.inner.read().await;
        if !inner.projects.contains_key(&project_id) {
            return Err(CoreError::not_found("project", project_id));
        }
        Ok(STAGE_ORDER
            .iter()
            .filter_map(|stage| inner.stages.get(&(project_id, *stage)).cloned())
            .collect())
    }

    async fn claim_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
    ) -> Result<StageRecord, CoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.stage_mut(project_id, stage)?;
        record.check_claimable()?;
        let now = Utc::now();
        if let Some(input) = input {
            record.input = input;
        }
        record.status = StageStatus::Processing;
        record.error_message = None;
        record.started_at = Some(now);
        record.completed_at = None;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn complete_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        status: StageStatus,
        write: OutputWrite,
    ) -> Result<StageRecord, CoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.stage_mut(project_id, stage)?;
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
        let now = Utc::now();
        record.status = status;
        record.error_message = None;
        record.completed_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn fail_stage(
        &self,
        project_id: DbId,
        stage: StageType,
        error: &str,
        count_retry: bool,
    ) -> Result<StageRecord, CoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.stage_mut(project_id, stage)?;
        if record.status != StageStatus::Processing {
            return Ok(record.clone());
        }
        let now = Utc::now();
        record.status = StageStatus::Failed;
        record.error_message = Some(error.to_string());
        if count_retry {
            record.retry_count += 1;
        }
        record.completed_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn merge_scenes(
        &self,
        project_id: DbId,
        stage: StageType,
        slot: PayloadSlot,
        patches: &[ScenePatch],
    ) -> Result<StageRecord, CoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.stage_mut(project_id, stage)?;
        let payload = match slot {
            PayloadSlot::Input => &mut record.input,
            PayloadSlot::Output => &mut record.output,
        };
        for patch in patches {
            patch.apply(payload);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn update_stage_data(
        &self,
        project_id: DbId,
        stage: StageType,
        input: Option<Value>,
        output: Option<Value>,
    ) -> Result<StageRecord, CoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.stage_mut(project_id, stage)?;
        if record.status == StageStatus::Processing {
            return Err(CoreError::Conflict(format!(
                "Stage {stage} of project {project_id} is running"
            )));
        }
        if let Some(input) = input {
            record.input = input;
        }
        if let Some(output) = output {
            record.output = output;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn rollback_from(
        &self,
        project_id: DbId,
        stage: StageType,
    ) -> Result<Vec<StageRecord>, CoreError> {
        let mut inner = self.inner.write().await;
        inner.project_mut(project_id)?;

        let affected = stage.downstream_inclusive();
        for target in affected {
            let record = inner.stage_mut(project_id, *target)?;
            if !record.status.can_roll_back() {
                return Err(CoreError::Conflict(format!(
                    "Stage {target} of project {project_id} is running"
                )));
            }
        }

        let now = Utc::now();
        let mut reset = Vec::with_capacity(affected.len());
        for target in affected {
            let record = inner.stage_mut(project_id, *target)?;
            record.status = StageStatus::Pending;
            record.output = json!({});
            if *target != stage {
                record.input = json!({});
            }
            record.error_message = None;
            record.retry_count = 0;
            record.started_at = None;
            record.completed_at = None;
            record.updated_at = now;
            reset.push(record.clone());
        }

        let project = inner.project_mut(project_id)?;
        project.status = ProjectStatus::Draft;
        project.updated_at = now;
        Ok(reset)
    }

    async fn record_image(&self, new: NewImage) -> Result<GeneratedImage, CoreError> {
        let mut inner = self.inner.write().await;
        let image = GeneratedImage {
            id: inner.next_id(),
            project_id: new.project_id,
            sequence_number: new.sequence_number,
            status: new.status,
            url: new.url,
            width: new.width,
            height: new.height,
            provider: new.provider,
            prompt: new.prompt,
            error_message: new.error_message,
            retry_count: new.retry_count,
            created_at: Utc::now(),
        };
        inner.images.push(image.clone());
        Ok(image)
    }

    async fn record_video(&self, new: NewVideo) -> Result<GeneratedVideo, CoreError> {
        let mut inner = self.inner.write().await;
        let video = GeneratedVideo {
            id: inner.next_id(),
            project_id: new.project_id,
            sequence_number: new.sequence_number,
            image_id: new.image_id,
            camera_movement: new.camera_movement,
            status: new.status,
            url: new.url,
            width: new.width,
            height: new.height,
            duration: new.duration,
            fps: new.fps,
            provider: new.provider,
            prompt: new.prompt,
            error_message: new.error_message,
            retry_count: new.retry_count,
            created_at: Utc::now(),
        };
        inner.videos.push(video.clone());
        Ok(video)
    }

    async fn latest_completed_image(
        &self,
        project_id: DbId,
        sequence_number: i32,
    ) -> Result<Option<GeneratedImage>, CoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .images
            .iter()
            .rev()
            .find(|img| {
                img.project_id == project_id
                    && img.sequence_number == sequence_number
                    && img.status == AssetStatus::Completed
            })
            .cloned())
    }

    async fn list_images(&self, project_id: DbId) -> Result<Vec<GeneratedImage>, CoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .images
            .iter()
            .filter(|img| img.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_videos(&self, project_id: DbId) -> Result<Vec<GeneratedVideo>, CoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .videos
            .iter()
            .filter(|v| v.project_id == project_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    async fn project_with_store() -> (MemoryStore, Project) {
        let store = MemoryStore::new();
        let project = store
            .create_project(NewProject::new("demo", "A cat learns to fly"))
            .await
            .unwrap();
        (store, project)
    }

    async fn run_to(store: &MemoryStore, pid: DbId, stage: StageType, status: StageStatus) {
        store.claim_stage(pid, stage, None).await.unwrap();
        store
            .complete_stage(pid, stage, status, OutputWrite::Replace(json!({"ok": stage.as_str()})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_project_seeds_five_pending_stages() {
        let (store, project) = project_with_store().await;
        let stages = store.list_stages(project.id).await.unwrap();
        assert_eq!(stages.len(), 5);
        assert!(stages.iter().all(|s| s.status == StageStatus::Pending));
        assert!(stages.iter().all(|s| s.max_retries == DEFAULT_MAX_RETRIES));
        assert_eq!(
            stages.iter().map(|s| s.stage).collect::<Vec<_>>(),
            STAGE_ORDER.to_vec()
        );
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let store = MemoryStore::new();
        assert_matches!(
            store.create_project(NewProject::new("x", "  ")).await,
            Err(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (store, project) = project_with_store().await;
        let claimed = store.claim_stage(project.id, StageType::Rewrite, None).await.unwrap();
        assert_eq!(claimed.status, StageStatus::Processing);
        assert!(claimed.started_at.is_some());
        assert_matches!(
            store.claim_stage(project.id, StageType::Rewrite, None).await,
            Err(CoreError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn completed_stage_cannot_be_claimed_again() {
        let (store, project) = project_with_store().await;
        run_to(&store, project.id, StageType::Rewrite, StageStatus::Completed).await;
        assert_matches!(
            store.claim_stage(project.id, StageType::Rewrite, None).await,
            Err(CoreError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn exhausted_failed_stage_cannot_be_claimed() {
        let store = MemoryStore::new();
        let mut new = NewProject::new("demo", "A cat learns to fly");
        new.max_retries = Some(1);
        let project = store.create_project(new).await.unwrap();

        store.claim_stage(project.id, StageType::Rewrite, None).await.unwrap();
        store
            .fail_stage(project.id, StageType::Rewrite, "boom", true)
            .await
            .unwrap();

        let err = store
            .claim_stage(project.id, StageType::Rewrite, None)
            .await
            .unwrap_err();
        assert_matches!(&err, CoreError::Conflict(msg) if msg.contains("retries"));
        let record = store.get_stage(project.id, StageType::Rewrite).await.unwrap();
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn claim_writes_input_only_when_accepted() {
        let (store, project) = project_with_store().await;
        let claimed = store
            .claim_stage(project.id, StageType::Rewrite, Some(json!({"raw_text": "first"})))
            .await
            .unwrap();
        assert_eq!(claimed.input["raw_text"], "first");
        store
            .complete_stage(
                project.id,
                StageType::Rewrite,
                StageStatus::Completed,
                OutputWrite::Replace(json!({"text": "done"})),
            )
            .await
            .unwrap();

        assert_matches!(
            store
                .claim_stage(project.id, StageType::Rewrite, Some(json!({"raw_text": "second"})))
                .await,
            Err(CoreError::Conflict(_))
        );
        let record = store.get_stage(project.id, StageType::Rewrite).await.unwrap();
        assert_eq!(record.input["raw_text"], "first");
    }

    #[tokio::test]
    async fn fail_stage_is_idempotent() {
        let (store, project) = project_with_store().await;
        store.claim_stage(project.id, StageType::Rewrite, None).await.unwrap();
        let first = store
            .fail_stage(project.id, StageType::Rewrite, "boom", true)
            .await
            .unwrap();
        let second = store
            .fail_stage(project.id, StageType::Rewrite, "boom again", true)
            .await
            .unwrap();
        assert_eq!(first.retry_count, 1);
        assert_eq!(second.retry_count, 1);
        assert_eq!(second.error_message.as_deref(), Some("boom"));
        assert_eq!(second.status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn rollback_resets_stage_and_downstream_only() {
        let (store, project) = project_with_store().await;
        let pid = project.id;
        for stage in STAGE_ORDER {
            run_to(&store, pid, stage, StageStatus::Completed).await;
        }
        store
            .merge_scenes(
                pid,
                StageType::VideoGeneration,
                PayloadSlot::Input,
                &[ScenePatch::new(1).set("image_urls", json!(["u"]))],
            )
            .await
            .unwrap();
        store.set_project_status(pid, ProjectStatus::Completed).await.unwrap();

        let reset = store.rollback_from(pid, StageType::Storyboard).await.unwrap();
        assert_eq!(reset.len(), 4);

        let stages = store.list_stages(pid).await.unwrap();
        let rewrite = &stages[0];
        assert_eq!(rewrite.status, StageStatus::Completed);
        assert_eq!(rewrite.output, json!({"ok": "rewrite"}));
        for record in &stages[1..] {
            assert_eq!(record.status, StageStatus::Pending);
            assert_eq!(record.output, json!({}));
            assert!(record.completed_at.is_none());
        }
        assert_eq!(stages[4].input, json!({}));
        assert_eq!(
            store.get_project(pid).await.unwrap().status,
            ProjectStatus::Draft
        );
    }

    #[tokio::test]
    async fn rollback_refused_while_stage_runs() {
        let (store, project) = project_with_store().await;
        run_to(&store, project.id, StageType::Rewrite, StageStatus::Completed).await;
        store.claim_stage(project.id, StageType::Storyboard, None).await.unwrap();
        assert_matches!(
            store.rollback_from(project.id, StageType::Rewrite).await,
            Err(CoreError::Conflict(_))
        );
        assert_eq!(
            store.get_stage(project.id, StageType::Rewrite).await.unwrap().status,
            StageStatus::Completed
        );
    }

    #[tokio::test]
    async fn concurrent_scene_merges_do_not_clobber() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject::new("demo", "topic"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for n in 1..=20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .merge_scenes(
                        project.id,
                        StageType::VideoGeneration,
                        PayloadSlot::Input,
                        &[ScenePatch::new(n).set("image_urls", json!([format!("u{n}")]))],
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store
            .get_stage(project.id, StageType::VideoGeneration)
            .await
            .unwrap();
        assert_eq!(record.input["scenes"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn merge_write_preserves_other_scene_output() {
        let (store, project) = project_with_store().await;
        let pid = project.id;
        let stage = StageType::ImageGeneration;
        store.claim_stage(pid, stage, None).await.unwrap();
        store
            .complete_stage(
                pid,
                stage,
                StageStatus::PartiallyCompleted,
                OutputWrite::Replace(json!({"scenes": [
                    {"sequence_number": 1, "image_urls": ["a"]},
                    {"sequence_number": 2, "image_urls": []},
                ]})),
            )
            .await
            .unwrap();

        store.claim_stage(pid, stage, None).await.unwrap();
        let record = store
            .complete_stage(
                pid,
                stage,
                StageStatus::Completed,
                OutputWrite::Merge(json!({"scenes": [{"sequence_number": 2, "image_urls": ["b2"]}]})),
            )
            .await
            .unwrap();
        assert_eq!(record.output["scenes"][0]["image_urls"][0], "a");
        assert_eq!(record.output["scenes"][1]["image_urls"][0], "b2");
    }

    #[tokio::test]
    async fn latest_completed_image_skips_failures() {
        let (store, project) = project_with_store().await;
        let base = NewImage {
            project_id: project.id,
            sequence_number: 1,
            status: AssetStatus::Completed,
            url: Some("first".into()),
            width: Some(720),
            height: Some(1280),
            provider: "mock".into(),
            prompt: "p".into(),
            error_message: None,
            retry_count: 0,
        };
        store.record_image(base.clone()).await.unwrap();
        store
            .record_image(NewImage {
                url: Some("second".into()),
                ..base.clone()
            })
            .await
            .unwrap();
        store
            .record_image(NewImage {
                status: AssetStatus::Failed,
                url: None,
                error_message: Some("x".into()),
                ..base
            })
            .await
            .unwrap();

        let latest = store
            .latest_completed_image(project.id, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.url.as_deref(), Some("second"));
        assert_eq!(store.list_images(project.id).await.unwrap().len(), 3);
        assert!(store.latest_completed_image(project.id, 2).await.unwrap().is_none());
    }
}
