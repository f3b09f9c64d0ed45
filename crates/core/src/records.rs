//! Persisted record types shared by every store implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::stage::{BackendKind, StageType};
use crate::status::{AssetStatus, ProjectStatus, StageStatus};
use crate::types::{DbId, Timestamp};

/// Retry bound stamped on stage records when the caller does not choose one.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Aggregate root owning the stage records and the Scene Dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: DbId,
    pub name: String,
    pub description: String,
    pub original_topic: String,
    pub status: ProjectStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    /// Metadata exposed to prompt templates under the `project` key.
    pub fn template_metadata(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "original_topic": self.original_topic,
        })
    }
}

/// DTO for creating a project.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub original_topic: String,
    /// Per-stage retry bound; defaults to [`DEFAULT_MAX_RETRIES`].
    pub max_retries: Option<i32>,
}

impl NewProject {
    pub fn new(name: impl Into<String>, original_topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            original_topic: original_topic.into(),
            max_retries: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage record
// ---------------------------------------------------------------------------

/// One row per (project, stage type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: DbId,
    pub project_id: DbId,
    pub stage: StageType,
    pub status: StageStatus,
    pub input: Value,
    pub output: Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl StageRecord {
    /// Whether an explicit retry is still allowed.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether this record may move to `processing` now.
    ///
    /// A `failed` stage with no retries left stays `failed` no matter which
    /// path tries to start it.
    pub fn check_claimable(&self) -> Result<(), CoreError> {
        if !self.status.can_transition_to(StageStatus::Processing) {
            return Err(CoreError::Conflict(format!(
                "Stage {} of project {} is {} and cannot start",
                self.stage, self.project_id, self.status
            )));
        }
        if self.status == StageStatus::Failed && !self.retries_remaining() {
            return Err(CoreError::Conflict(format!(
                "Stage {} has used all {} retries",
                self.stage, self.max_retries
            )));
        }
        Ok(())
    }
}

/// How a terminal write treats the stage's existing output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputWrite {
    /// Overwrite the output payload.
    Replace(Value),
    /// Merge scene-by-scene via [`crate::scene::merge_payload`].
    Merge(Value),
}

/// Which payload of a stage record a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSlot {
    Input,
    Output,
}

// ---------------------------------------------------------------------------
// Generated assets
// ---------------------------------------------------------------------------

/// One image generation attempt for a scene. Failed attempts are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: DbId,
    pub project_id: DbId,
    pub sequence_number: i32,
    pub status: AssetStatus,
    pub url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub provider: String,
    pub prompt: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub project_id: DbId,
    pub sequence_number: i32,
    pub status: AssetStatus,
    pub url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub provider: String,
    pub prompt: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

/// One video generation attempt, linked to the image and motion it used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedVideo {
    pub id: DbId,
    pub project_id: DbId,
    pub sequence_number: i32,
    pub image_id: Option<DbId>,
    pub camera_movement: Value,
    pub status: AssetStatus,
    pub url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<f64>,
    pub fps: Option<i32>,
    pub provider: String,
    pub prompt: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub project_id: DbId,
    pub sequence_number: i32,
    pub image_id: Option<DbId>,
    pub camera_movement: Value,
    pub status: AssetStatus,
    pub url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<f64>,
    pub fps: Option<i32>,
    pub provider: String,
    pub prompt: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

// ---------------------------------------------------------------------------
// Configuration records
// ---------------------------------------------------------------------------

/// Connection settings for one generative backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: BackendKind,
    /// Base URL, or `mock` for the built-in deterministic backend.
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default)]
    pub extra: Value,
}

impl ProviderConfig {
    /// A mock provider of the given kind.
    pub fn mock(kind: BackendKind) -> Self {
        Self {
            name: format!("mock-{}", kind.as_str()),
            kind,
            base_url: "mock".to_string(),
            api_key: None,
            model: "mock".to_string(),
            extra: Value::Null,
        }
    }

    pub fn is_mock(&self) -> bool {
        self.base_url == "mock" || self.base_url.starts_with("mock://")
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .finish()
    }
}

/// Prompt template for a text stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub stage: StageType,
    pub body: String,
    /// Provider name used when the project has no override.
    pub default_provider: Option<String>,
}
