//! Request/response types and the backend traits.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storyreel_core::stage::StageType;

use crate::error::BackendError;

/// Incremental text chunks from a streaming text backend.
pub type TokenStream = BoxStream<'static, Result<String, BackendError>>;

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRequest {
    /// Stage the request is made for; used for logging and by mocks.
    pub stage: StageType,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextBackend: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Start a generation and return its token stream.
    async fn stream(&self, request: &TextRequest) -> Result<TokenStream, BackendError>;

    /// Run a generation to completion and return the accumulated text.
    async fn complete(&self, request: &TextRequest) -> Result<String, BackendError> {
        let mut tokens = self.stream(request).await?;
        let mut full = String::new();
        while let Some(chunk) = tokens.next().await {
            full.push_str(&chunk?);
        }
        Ok(full)
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    /// Aspect ratio such as `9:16`.
    pub ratio: String,
    /// Resolution class such as `2k`.
    pub resolution: String,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOutput {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn generate(&self, request: &ImageRequest) -> Result<Vec<ImageOutput>, BackendError>;
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoRequest {
    pub prompt: String,
    pub image_url: String,
    pub camera_movement: Value,
    /// Requested clip length in seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoOutput {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub fps: u32,
}

#[async_trait]
pub trait VideoBackend: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn generate(&self, request: &VideoRequest) -> Result<Vec<VideoOutput>, BackendError>;
}
