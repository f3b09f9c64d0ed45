//! Channel addressing.
//!
//! A channel is keyed by `(project, stage)`; the wildcard form
//! `(project, *)` aggregates every stage of one project plus the
//! pipeline-scoped messages published by the runner.

use std::fmt;

use storyreel_core::stage::StageType;
use storyreel_core::types::DbId;

use crate::message::{ProgressMessage, PIPELINE_STAGE};

/// Prefix of every channel name.
const CHANNEL_PREFIX: &str = "storyreel:project";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    Stage(StageType),
    /// Wildcard over all stages of the project.
    Pipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub project_id: DbId,
    pub scope: ChannelScope,
}

impl ChannelKey {
    pub fn stage(project_id: DbId, stage: StageType) -> Self {
        Self {
            project_id,
            scope: ChannelScope::Stage(stage),
        }
    }

    pub fn project(project_id: DbId) -> Self {
        Self {
            project_id,
            scope: ChannelScope::Pipeline,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.scope == ChannelScope::Pipeline
    }

    /// Whether a message published on the hub belongs to this channel.
    ///
    /// Stage channels see their own stage's messages and the project's
    /// pipeline-scoped messages; the wildcard sees everything of the project.
    pub fn matches(&self, msg: &ProgressMessage) -> bool {
        if msg.project_id != self.project_id {
            return false;
        }
        match self.scope {
            ChannelScope::Pipeline => true,
            ChannelScope::Stage(stage) => {
                msg.stage == stage.as_str() || msg.stage == PIPELINE_STAGE
            }
        }
    }

    /// Whether `msg` ends a subscription on this channel.
    ///
    /// A single-stage subscriber stops on its own stage's `done`/`error`.
    /// A wildcard subscriber ignores per-stage terminals and stops only on
    /// `pipeline_done`/`pipeline_error`.
    pub fn is_terminal(&self, msg: &ProgressMessage) -> bool {
        match self.scope {
            ChannelScope::Pipeline => msg.kind.is_pipeline_terminal(),
            ChannelScope::Stage(stage) => {
                msg.stage == stage.as_str() && msg.kind.is_stage_terminal()
            }
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.scope {
            ChannelScope::Stage(stage) => stage.as_str(),
            ChannelScope::Pipeline => PIPELINE_STAGE,
        };
        write!(f, "{CHANNEL_PREFIX}:{}:stage:{stage}", self.project_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn done(project_id: DbId, stage: StageType) -> ProgressMessage {
        ProgressMessage::for_stage(
            project_id,
            stage,
            MessageKind::Done {
                full_text: None,
                metadata: None,
            },
        )
    }

    #[test]
    fn formats_channel_names() {
        assert_eq!(
            ChannelKey::stage(5, StageType::ImageGeneration).to_string(),
            "storyreel:project:5:stage:image_generation"
        );
        assert_eq!(ChannelKey::project(5).to_string(), "storyreel:project:5:stage:*");
    }

    #[test]
    fn stage_channel_filters_other_stages_and_projects() {
        let key = ChannelKey::stage(1, StageType::Rewrite);
        assert!(key.matches(&done(1, StageType::Rewrite)));
        assert!(!key.matches(&done(1, StageType::Storyboard)));
        assert!(!key.matches(&done(2, StageType::Rewrite)));
        assert!(key.matches(&ProgressMessage::for_pipeline(
            1,
            MessageKind::Info { message: "x".into() }
        )));
    }

    #[test]
    fn wildcard_sees_every_stage_but_ends_only_on_pipeline_terminal() {
        let key = ChannelKey::project(1);
        let stage_done = done(1, StageType::Storyboard);
        assert!(key.matches(&stage_done));
        assert!(!key.is_terminal(&stage_done));

        let pipeline_done = ProgressMessage::for_pipeline(
            1,
            MessageKind::PipelineDone {
                metadata: serde_json::json!({}),
            },
        );
        assert!(key.is_terminal(&pipeline_done));
    }

    #[test]
    fn stage_channel_ends_on_own_terminal_only() {
        let key = ChannelKey::stage(1, StageType::Storyboard);
        assert!(key.is_terminal(&done(1, StageType::Storyboard)));
        assert!(!key.is_terminal(&done(1, StageType::Rewrite)));
    }
}
