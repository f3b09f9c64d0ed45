//! Events emitted by stage processors.
//!
//! These are the processor-side vocabulary; the dispatcher translates them
//! into channel messages and performs the terminal stage-record write.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use storyreel_core::records::OutputWrite;
use storyreel_core::status::StageStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Video,
    CameraMovement,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::CameraMovement => "camera_movement",
        }
    }
}

/// Terminal success payload of a stage run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    /// `Completed` or `PartiallyCompleted`.
    pub status: StageStatus,
    pub output: OutputWrite,
    /// Accumulated text for text stages.
    pub full_text: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Info(String),
    Token {
        content: String,
        full_text: String,
    },
    Progress {
        current: usize,
        total: usize,
        item_name: String,
    },
    AssetGenerated {
        sequence_number: i32,
        kind: AssetKind,
        urls: Vec<String>,
    },
    /// A unit failed or was skipped; the stage continues.
    Warning {
        message: String,
        sequence_number: Option<i32>,
    },
    /// Terminal: the stage finished, possibly with failed units.
    Done(StageResult),
    /// Terminal: the stage as a whole could not proceed.
    Error(String),
    /// Terminal: the run stopped at a unit boundary after cancellation.
    Cancelled,
}

impl StageEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_) | Self::Cancelled)
    }
}

/// Success/failure tally of a per-scene stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitTally {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl UnitTally {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Terminal status for the tally, or `None` when nothing succeeded.
    ///
    /// Any failure alongside at least one success yields
    /// `PartiallyCompleted`.
    pub fn status(&self) -> Option<StageStatus> {
        match (self.succeeded, self.failed) {
            (0, _) => None,
            (_, 0) => Some(StageStatus::Completed),
            _ => Some(StageStatus::PartiallyCompleted),
        }
    }

    /// Counters as stored in stage output and `done` metadata.
    pub fn to_json(&self) -> Value {
        json!({
            "total_storyboards": self.total,
            "success_count": self.succeeded,
            "failed_count": self.failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_status_policy() {
        let mut tally = UnitTally::new(5);
        assert_eq!(tally.status(), None);
        tally.succeeded = 5;
        assert_eq!(tally.status(), Some(StageStatus::Completed));
        tally.succeeded = 4;
        tally.failed = 1;
        assert_eq!(tally.status(), Some(StageStatus::PartiallyCompleted));
        tally.succeeded = 0;
        tally.failed = 5;
        assert_eq!(tally.status(), None);
    }

    #[test]
    fn tally_json_fields() {
        let tally = UnitTally {
            total: 5,
            succeeded: 4,
            failed: 1,
        };
        let value = tally.to_json();
        assert_eq!(value["success_count"], 4);
        assert_eq!(value["failed_count"], 1);
        assert_eq!(value["total_storyboards"], 5);
    }
}
