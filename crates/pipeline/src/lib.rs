//! Stage processors for the storyreel pipeline.
//!
//! A [`StageProcessor`] validates a stage's preconditions and then emits an
//! ordered sequence of [`StageEvent`]s while it generates: one `info`, then
//! per unit of work a `progress` followed by a success or warning event,
//! then exactly one terminal event. Three variants cover the five stages:
//!
//! - [`processor::text::TextStageProcessor`] -- rewrite, storyboard, camera movement.
//! - [`processor::image::ImageStageProcessor`] -- image generation.
//! - [`processor::video::VideoStageProcessor`] -- video generation.
//!
//! Per-scene units run through a bounded, order-preserving fan-out
//! ([`fanout`]) and stop at the next unit boundary once cancelled.

pub mod config;
pub mod context;
pub mod event;
pub mod fanout;
pub mod processor;

pub use config::ProcessorConfig;
pub use context::{PipelineServices, StageContext};
pub use event::{AssetKind, StageEvent, StageResult};
pub use processor::{processor_for, StageProcessor};
