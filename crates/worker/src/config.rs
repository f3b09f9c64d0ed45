use std::str::FromStr;

use storyreel_core::records::DEFAULT_MAX_RETRIES;
use storyreel_pipeline::config::{
    DEFAULT_CAMERA_MAX_CONCURRENT, DEFAULT_IMAGE_MAX_CONCURRENT, DEFAULT_VIDEO_MAX_CONCURRENT,
};
use storyreel_pipeline::ProcessorConfig;

/// Capacity of the processor-to-dispatcher event queue.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Stage execution settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub processor: ProcessorConfig,
    /// Retry budget given to new projects that do not set their own.
    pub max_retries: i32,
    /// Events a processor may run ahead of the dispatcher before it waits.
    pub event_buffer: usize,
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `IMAGE_MAX_CONCURRENT`   | `3`     |
    /// | `VIDEO_MAX_CONCURRENT`   | `2`     |
    /// | `CAMERA_MAX_CONCURRENT`  | `1`     |
    /// | `IMAGE_RATIO`            | `9:16`  |
    /// | `IMAGE_RESOLUTION`       | `2k`    |
    /// | `STAGE_MAX_RETRIES`      | `3`     |
    /// | `STAGE_EVENT_BUFFER`     | `64`    |
    pub fn from_env() -> Self {
        let defaults = ProcessorConfig::default();
        let processor = ProcessorConfig {
            image_max_concurrent: env_or("IMAGE_MAX_CONCURRENT", DEFAULT_IMAGE_MAX_CONCURRENT),
            video_max_concurrent: env_or("VIDEO_MAX_CONCURRENT", DEFAULT_VIDEO_MAX_CONCURRENT),
            camera_max_concurrent: env_or("CAMERA_MAX_CONCURRENT", DEFAULT_CAMERA_MAX_CONCURRENT),
            image_ratio: std::env::var("IMAGE_RATIO").unwrap_or(defaults.image_ratio),
            image_resolution: std::env::var("IMAGE_RESOLUTION").unwrap_or(defaults.image_resolution),
        };

        Self {
            processor,
            max_retries: env_or("STAGE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            event_buffer: env_or("STAGE_EVENT_BUFFER", DEFAULT_EVENT_BUFFER),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorConfig::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}
