use storyreel_core::stage::StageType;

/// Default concurrent image generations per stage run.
pub const DEFAULT_IMAGE_MAX_CONCURRENT: usize = 3;

/// Default concurrent video generations per stage run.
pub const DEFAULT_VIDEO_MAX_CONCURRENT: usize = 2;

/// Default concurrent camera-movement prompts per stage run.
pub const DEFAULT_CAMERA_MAX_CONCURRENT: usize = 1;

/// Tuning knobs the processors read at run time.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub image_max_concurrent: usize,
    pub video_max_concurrent: usize,
    pub camera_max_concurrent: usize,
    /// Aspect ratio requested from image backends.
    pub image_ratio: String,
    /// Resolution class requested from image backends.
    pub image_resolution: String,
}

impl ProcessorConfig {
    /// Concurrency bound for the per-scene units of `stage` (at least 1).
    pub fn max_concurrent(&self, stage: StageType) -> usize {
        let limit = match stage {
            StageType::ImageGeneration => self.image_max_concurrent,
            StageType::VideoGeneration => self.video_max_concurrent,
            StageType::CameraMovement => self.camera_max_concurrent,
            StageType::Rewrite | StageType::Storyboard => 1,
        };
        limit.max(1)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            image_max_concurrent: DEFAULT_IMAGE_MAX_CONCURRENT,
            video_max_concurrent: DEFAULT_VIDEO_MAX_CONCURRENT,
            camera_max_concurrent: DEFAULT_CAMERA_MAX_CONCURRENT,
            image_ratio: "9:16".to_string(),
            image_resolution: "2k".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let config = ProcessorConfig {
            video_max_concurrent: 0,
            ..ProcessorConfig::default()
        };
        assert_eq!(config.max_concurrent(StageType::VideoGeneration), 1);
        assert_eq!(config.max_concurrent(StageType::ImageGeneration), 3);
        assert_eq!(config.max_concurrent(StageType::Rewrite), 1);
    }
}
