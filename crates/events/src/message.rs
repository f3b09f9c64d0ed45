//! Progress message envelope and its typed payloads.
//!
//! On the wire every message is a flat JSON object:
//!
//! ```json
//! {"project_id": 7, "stage": "storyboard", "timestamp": "...", "type": "token",
//!  "content": "Sc", "full_text": "Sc"}
//! ```
//!
//! Pipeline-scoped messages use `"*"` as their stage.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storyreel_core::stage::StageType;
use storyreel_core::types::{DbId, Timestamp};

/// Stage label carried by pipeline-scoped messages.
pub const PIPELINE_STAGE: &str = "*";

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The `type`-tagged body of a [`ProgressMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Incremental text from a streaming backend.
    Token { content: String, full_text: String },

    /// Unit-of-work counter.
    Progress {
        current: usize,
        total: usize,
        /// Percentage, 0 to 100.
        progress: f64,
        item_name: String,
    },

    StageUpdate {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    Info { message: String },

    /// A unit of work failed or was skipped; the stage carries on.
    Warning {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<i32>,
    },

    AssetGenerated {
        sequence_number: i32,
        asset_kind: String,
        urls: Vec<String>,
    },

    /// Stage-scoped terminal success.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// Lightweight "refresh your view" signal sent after `done`.
    StageCompleted {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// Stage-scoped terminal failure.
    Error { error: String, retry_count: i32 },

    PipelineDone { metadata: Value },

    PipelineError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_stage: Option<String>,
    },
}

impl MessageKind {
    /// The wire `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Progress { .. } => "progress",
            Self::StageUpdate { .. } => "stage_update",
            Self::Info { .. } => "info",
            Self::Warning { .. } => "warning",
            Self::AssetGenerated { .. } => "asset_generated",
            Self::Done { .. } => "done",
            Self::StageCompleted { .. } => "stage_completed",
            Self::Error { .. } => "error",
            Self::PipelineDone { .. } => "pipeline_done",
            Self::PipelineError { .. } => "pipeline_error",
        }
    }

    /// `done` or `error`: ends a single-stage subscription.
    pub fn is_stage_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// `pipeline_done` or `pipeline_error`: ends a wildcard subscription.
    pub fn is_pipeline_terminal(&self) -> bool {
        matches!(self, Self::PipelineDone { .. } | Self::PipelineError { .. })
    }

    /// Build a `progress` message for unit `current` of `total`.
    pub fn progress(current: usize, total: usize, item_name: impl Into<String>) -> Self {
        let progress = if total == 0 {
            100.0
        } else {
            (current as f64 / total as f64 * 1000.0).round() / 10.0
        };
        Self::Progress {
            current,
            total,
            progress,
            item_name: item_name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressMessage
// ---------------------------------------------------------------------------

/// A progress event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub project_id: DbId,
    /// Stage name, or [`PIPELINE_STAGE`] for pipeline-scoped messages.
    pub stage: String,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl ProgressMessage {
    pub fn for_stage(project_id: DbId, stage: StageType, kind: MessageKind) -> Self {
        Self {
            project_id,
            stage: stage.as_str().to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn for_pipeline(project_id: DbId, kind: MessageKind) -> Self {
        Self {
            project_id,
            stage: PIPELINE_STAGE.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn is_pipeline_scoped(&self) -> bool {
        self.stage == PIPELINE_STAGE
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
