//! Pipeline stage identifiers, ordering, and dependency graph.
//!
//! The pipeline always runs in [`STAGE_ORDER`]. Each stage declares the
//! stages whose output it consumes ([`StageType::upstream`]); a rollback of
//! one stage invalidates every stage after it in the order
//! ([`StageType::downstream_inclusive`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// StageType
// ---------------------------------------------------------------------------

/// One named step of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Rewrite,
    Storyboard,
    ImageGeneration,
    CameraMovement,
    VideoGeneration,
}

/// Fixed execution order of a full pipeline run.
pub const STAGE_ORDER: [StageType; 5] = [
    StageType::Rewrite,
    StageType::Storyboard,
    StageType::ImageGeneration,
    StageType::CameraMovement,
    StageType::VideoGeneration,
];

impl StageType {
    /// Canonical wire and database name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::Storyboard => "storyboard",
            Self::ImageGeneration => "image_generation",
            Self::CameraMovement => "camera_movement",
            Self::VideoGeneration => "video_generation",
        }
    }

    /// Zero-based position in [`STAGE_ORDER`].
    pub fn position(self) -> usize {
        match self {
            Self::Rewrite => 0,
            Self::Storyboard => 1,
            Self::ImageGeneration => 2,
            Self::CameraMovement => 3,
            Self::VideoGeneration => 4,
        }
    }

    /// Stages whose completed output this stage consumes.
    pub fn upstream(self) -> &'static [StageType] {
        match self {
            Self::Rewrite => &[],
            Self::Storyboard => &[Self::Rewrite],
            Self::ImageGeneration => &[Self::Storyboard],
            Self::CameraMovement => &[Self::Storyboard],
            Self::VideoGeneration => &[Self::ImageGeneration, Self::CameraMovement],
        }
    }

    /// This stage followed by every later stage in the pipeline order.
    pub fn downstream_inclusive(self) -> &'static [StageType] {
        &STAGE_ORDER[self.position()..]
    }

    /// Which family of generative backend serves this stage.
    pub fn backend_kind(self) -> BackendKind {
        match self {
            Self::Rewrite | Self::Storyboard | Self::CameraMovement => BackendKind::Text,
            Self::ImageGeneration => BackendKind::Image,
            Self::VideoGeneration => BackendKind::Video,
        }
    }

    /// Default sampling parameters for text stages, `None` for media stages.
    pub fn sampling(self) -> Option<Sampling> {
        match self {
            Self::Rewrite => Some(Sampling {
                temperature: 0.7,
                max_tokens: 2000,
            }),
            Self::Storyboard => Some(Sampling {
                temperature: 0.8,
                max_tokens: 4000,
            }),
            Self::CameraMovement => Some(Sampling {
                temperature: 0.6,
                max_tokens: 1000,
            }),
            Self::ImageGeneration | Self::VideoGeneration => None,
        }
    }

    /// Whether the stage iterates over storyboard scenes.
    pub fn is_per_scene(self) -> bool {
        !matches!(self, Self::Rewrite | Self::Storyboard)
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STAGE_ORDER
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown stage '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// BackendKind / Sampling
// ---------------------------------------------------------------------------

/// The three shapes of external generative service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Text,
    Image,
    Video,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(CoreError::Validation(format!(
                "Unknown backend kind '{other}'"
            ))),
        }
    }
}

/// Sampling parameters passed to a text backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn names_round_trip_through_from_str() {
        for stage in STAGE_ORDER {
            assert_eq!(stage.as_str().parse::<StageType>().unwrap(), stage);
        }
    }

    #[test]
    fn unknown_stage_name_is_validation_error() {
        assert_matches!(
            "image-generation".parse::<StageType>(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn upstream_stages_always_precede_in_order() {
        for stage in STAGE_ORDER {
            for up in stage.upstream() {
                assert!(up.position() < stage.position());
            }
        }
    }

    #[test]
    fn video_depends_on_image_and_camera() {
        assert_eq!(
            StageType::VideoGeneration.upstream(),
            &[StageType::ImageGeneration, StageType::CameraMovement]
        );
    }

    #[test]
    fn downstream_of_storyboard_has_four_stages() {
        assert_eq!(
            StageType::Storyboard.downstream_inclusive(),
            &[
                StageType::Storyboard,
                StageType::ImageGeneration,
                StageType::CameraMovement,
                StageType::VideoGeneration,
            ]
        );
    }

    #[test]
    fn sampling_only_for_text_stages() {
        for stage in STAGE_ORDER {
            assert_eq!(
                stage.sampling().is_some(),
                stage.backend_kind() == BackendKind::Text
            );
        }
        assert_eq!(StageType::Storyboard.sampling().unwrap().max_tokens, 4000);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&StageType::CameraMovement).unwrap();
        assert_eq!(json, "\"camera_movement\"");
    }
}
