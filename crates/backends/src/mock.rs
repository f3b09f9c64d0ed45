//! Deterministic in-process backends.
//!
//! Used for local development (providers whose base URL is `mock`) and
//! throughout the test suites. Outputs are derived from a SHA-256 of the
//! prompt, so the same prompt always yields the same URL. Failures can be
//! injected by prompt substring.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use storyreel_core::stage::StageType;

use crate::error::BackendError;
use crate::types::{
    ImageBackend, ImageOutput, ImageRequest, TextBackend, TextRequest, TokenStream, VideoBackend,
    VideoOutput, VideoRequest,
};

/// Host used in generated mock URLs.
const MOCK_HOST: &str = "https://mock.storyreel.local";

/// Frame rate reported for mock clips.
const MOCK_FPS: u32 = 24;

fn prompt_digest(prompt: &str) -> String {
    let hash = Sha256::digest(prompt.as_bytes());
    format!("{hash:x}")[..16].to_string()
}

fn rejected_by(fail_on: &[String], prompt: &str) -> Option<BackendError> {
    fail_on
        .iter()
        .find(|needle| prompt.contains(needle.as_str()))
        .map(|needle| BackendError::Rejected(format!("prompt matched '{needle}'")))
}

/// Pixel size for an aspect ratio at the mock's fixed long edge.
fn dimensions(ratio: &str) -> (u32, u32) {
    const LONG_EDGE: u32 = 1920;
    let parsed = ratio
        .split_once(':')
        .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)))
        .filter(|(w, h)| *w > 0 && *h > 0);
    match parsed {
        Some((w, h)) if w >= h => (LONG_EDGE, LONG_EDGE * h / w),
        Some((w, h)) => (LONG_EDGE * w / h, LONG_EDGE),
        None => (1080, LONG_EDGE),
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Canned per-stage text responses, streamed word by word.
#[derive(Default)]
pub struct MockTextBackend {
    fixed_response: Option<String>,
    fail_on: Vec<String>,
    calls: AtomicUsize,
}

impl MockTextBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `text`, whatever the stage.
    pub fn with_response(text: impl Into<String>) -> Self {
        Self {
            fixed_response: Some(text.into()),
            ..Self::default()
        }
    }

    /// Fail any request whose user prompt contains `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on.push(needle.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn canned(&self, request: &TextRequest) -> String {
        if let Some(text) = &self.fixed_response {
            return text.clone();
        }
        match request.stage {
            StageType::Rewrite => format!(
                "Once upon a time, {}. Step by step the story unfolds, and in the end everyone remembers it.",
                request.user_prompt.trim()
            ),
            StageType::Storyboard => json!({
                "scenes": [
                    {"scene_number": 1, "narration": "The story begins.", "visual_prompt": "establishing shot, soft morning light", "shot_type": "wide", "duration": 3.0},
                    {"scene_number": 2, "narration": "Things take a turn.", "visual_prompt": "close-up of the protagonist, dramatic shadows", "shot_type": "close-up", "duration": 4.0},
                    {"scene_number": 3, "narration": "A quiet ending.", "visual_prompt": "sunset over the hills, warm tones", "shot_type": "wide"},
                ]
            })
            .to_string(),
            StageType::CameraMovement => json!({
                "movement_type": "slow_zoom_in",
                "params": {"speed": "slow", "start_scale": 1.0, "end_scale": 1.2},
            })
            .to_string(),
            StageType::ImageGeneration | StageType::VideoGeneration => String::new(),
        }
    }
}

#[async_trait]
impl TextBackend for MockTextBackend {
    fn provider_name(&self) -> &str {
        "mock-text"
    }

    async fn stream(&self, request: &TextRequest) -> Result<TokenStream, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = rejected_by(&self.fail_on, &request.user_prompt) {
            return Err(err);
        }
        let chunks: Vec<Result<String, BackendError>> = self
            .canned(request)
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockImageBackend {
    fail_on: Vec<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockImageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any request whose prompt contains `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on.push(needle.into());
        self
    }

    /// Sleep before answering, to make concurrency observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBackend for MockImageBackend {
    fn provider_name(&self) -> &str {
        "mock-image"
    }

    async fn generate(&self, request: &ImageRequest) -> Result<Vec<ImageOutput>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = rejected_by(&self.fail_on, &request.prompt) {
            return Err(err);
        }
        let (width, height) = dimensions(&request.ratio);
        Ok(vec![ImageOutput {
            url: format!("{MOCK_HOST}/images/{}.png", prompt_digest(&request.prompt)),
            width,
            height,
        }])
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockVideoBackend {
    fail_on: Vec<String>,
    calls: AtomicUsize,
}

impl MockVideoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any request whose prompt contains `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on.push(needle.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoBackend for MockVideoBackend {
    fn provider_name(&self) -> &str {
        "mock-video"
    }

    async fn generate(&self, request: &VideoRequest) -> Result<Vec<VideoOutput>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = rejected_by(&self.fail_on, &request.prompt) {
            return Err(err);
        }
        let seed = format!("{}|{}", request.image_url, request.prompt);
        Ok(vec![VideoOutput {
            url: format!("{MOCK_HOST}/videos/{}.mp4", prompt_digest(&seed)),
            width: 1080,
            height: 1920,
            duration: request.duration,
            fps: MOCK_FPS,
        }])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use storyreel_core::storyboard::{parse_camera_movement, parse_storyboard};

    fn text_request(stage: StageType, user_prompt: &str) -> TextRequest {
        TextRequest {
            stage,
            system_prompt: "sys".into(),
            user_prompt: user_prompt.into(),
            temperature: 0.7,
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn canned_storyboard_parses() {
        let backend = MockTextBackend::new();
        let text = backend
            .complete(&text_request(StageType::Storyboard, "script"))
            .await
            .unwrap();
        assert_eq!(parse_storyboard(&text).unwrap().len(), 3);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn canned_camera_movement_is_json() {
        let text = MockTextBackend::new()
            .complete(&text_request(StageType::CameraMovement, "shot"))
            .await
            .unwrap();
        assert_eq!(parse_camera_movement(&text)["movement_type"], "slow_zoom_in");
    }

    #[tokio::test]
    async fn rewrite_streams_multiple_tokens() {
        use futures::StreamExt;
        let backend = MockTextBackend::new();
        let stream = backend
            .stream(&text_request(StageType::Rewrite, "a cat learns to fly"))
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert!(chunks.len() > 5);
        let full: String = chunks.into_iter().map(Result::unwrap).collect();
        assert!(full.contains("a cat learns to fly"));
    }

    #[tokio::test]
    async fn image_urls_are_deterministic_per_prompt() {
        let backend = MockImageBackend::new();
        let request = ImageRequest {
            prompt: "sunrise".into(),
            ratio: "9:16".into(),
            resolution: "2k".into(),
            seed: Some(1),
        };
        let a = backend.generate(&request).await.unwrap();
        let b = backend.generate(&request).await.unwrap();
        assert_eq!(a, b);
        assert_eq!((a[0].width, a[0].height), (1080, 1920));
    }

    #[tokio::test]
    async fn failure_injection_by_prompt() {
        let backend = MockImageBackend::new().failing_on("scene 3");
        let request = ImageRequest {
            prompt: "scene 3: storm".into(),
            ratio: "16:9".into(),
            resolution: "2k".into(),
            seed: None,
        };
        assert_matches!(backend.generate(&request).await, Err(BackendError::Rejected(_)));
    }

    #[test]
    fn ratio_dimensions() {
        assert_eq!(dimensions("16:9"), (1920, 1080));
        assert_eq!(dimensions("1:1"), (1920, 1920));
        assert_eq!(dimensions("bogus"), (1080, 1920));
    }
}
