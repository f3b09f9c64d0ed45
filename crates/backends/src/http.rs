//! HTTP clients for OpenAI-compatible generation endpoints.
//!
//! | Kind  | Endpoint                          | Response                     |
//! |-------|-----------------------------------|------------------------------|
//! | text  | `POST {base}/chat/completions`    | SSE stream of deltas         |
//! | image | `POST {base}/images/generations`  | `{"data": [ImageOutput]}`    |
//! | video | `POST {base}/videos/generations`  | `{"data": [VideoOutput]}`    |

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use storyreel_core::records::ProviderConfig;

use crate::error::BackendError;
use crate::sse::{parse_delta, SseDecoder, SseEvent};
use crate::types::{
    ImageBackend, ImageOutput, ImageRequest, TextBackend, TextRequest, TokenStream, VideoBackend,
    VideoOutput, VideoRequest,
};

/// `{"data": [...]}` envelope used by the media endpoints.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
}

// ---------------------------------------------------------------------------
// Shared client
// ---------------------------------------------------------------------------

/// Connection settings plus a pooled [`reqwest::Client`].
#[derive(Clone)]
struct HttpEndpoint {
    client: reqwest::Client,
    provider: ProviderConfig,
}

impl HttpEndpoint {
    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.provider.base_url.trim_end_matches('/'))
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, BackendError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.provider.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        ensure_success(response).await
    }
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a [`BackendError::ApiError`] containing the
/// status and body text on failure.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(BackendError::ApiError {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Parse a successful `{"data": [...]}` body, rejecting an empty list.
async fn parse_data<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Vec<T>, BackendError> {
    let envelope: DataEnvelope<T> = response.json().await?;
    if envelope.data.is_empty() {
        return Err(BackendError::Parse("response contained no results".into()));
    }
    Ok(envelope.data)
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Streaming chat-completion client.
pub struct HttpTextBackend {
    endpoint: HttpEndpoint,
}

impl HttpTextBackend {
    pub fn new(client: reqwest::Client, provider: ProviderConfig) -> Self {
        Self {
            endpoint: HttpEndpoint { client, provider },
        }
    }
}

struct SseState {
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, BackendError>>,
    finished: bool,
}

#[async_trait]
impl TextBackend for HttpTextBackend {
    fn provider_name(&self) -> &str {
        &self.endpoint.provider.name
    }

    async fn stream(&self, request: &TextRequest) -> Result<TokenStream, BackendError> {
        let body = json!({
            "model": self.endpoint.provider.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });
        tracing::debug!(
            provider = %self.endpoint.provider.name,
            stage = %request.stage,
            "Starting text generation stream"
        );
        let response = self.endpoint.post("chat/completions", &body).await?;

        let state = SseState {
            response,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };
        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, Some(state)));
                }
                if state.finished {
                    return None;
                }
                match state.response.chunk().await {
                    Ok(Some(bytes)) => {
                        for event in state.decoder.push(&bytes) {
                            match event {
                                SseEvent::Data(data) => match parse_delta(&data) {
                                    Ok(Some(text)) => state.pending.push_back(Ok(text)),
                                    Ok(None) => {}
                                    Err(e) => state.pending.push_back(Err(e)),
                                },
                                SseEvent::Done => state.finished = true,
                            }
                        }
                    }
                    Ok(None) => state.finished = true,
                    Err(e) => return Some((Err(BackendError::Request(e)), None)),
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

pub struct HttpImageBackend {
    endpoint: HttpEndpoint,
}

impl HttpImageBackend {
    pub fn new(client: reqwest::Client, provider: ProviderConfig) -> Self {
        Self {
            endpoint: HttpEndpoint { client, provider },
        }
    }
}

#[async_trait]
impl ImageBackend for HttpImageBackend {
    fn provider_name(&self) -> &str {
        &self.endpoint.provider.name
    }

    async fn generate(&self, request: &ImageRequest) -> Result<Vec<ImageOutput>, BackendError> {
        let body = json!({
            "model": self.endpoint.provider.model,
            "prompt": request.prompt,
            "ratio": request.ratio,
            "resolution": request.resolution,
            "seed": request.seed,
            "n": 1,
        });
        let response = self.endpoint.post("images/generations", &body).await?;
        parse_data(response).await
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

pub struct HttpVideoBackend {
    endpoint: HttpEndpoint,
}

impl HttpVideoBackend {
    pub fn new(client: reqwest::Client, provider: ProviderConfig) -> Self {
        Self {
            endpoint: HttpEndpoint { client, provider },
        }
    }
}

#[async_trait]
impl VideoBackend for HttpVideoBackend {
    fn provider_name(&self) -> &str {
        &self.endpoint.provider.name
    }

    async fn generate(&self, request: &VideoRequest) -> Result<Vec<VideoOutput>, BackendError> {
        let body = json!({
            "model": self.endpoint.provider.model,
            "prompt": request.prompt,
            "image_url": request.image_url,
            "camera_movement": request.camera_movement,
            "duration": request.duration,
        });
        let response = self.endpoint.post("videos/generations", &body).await?;
        parse_data(response).await
    }
}
