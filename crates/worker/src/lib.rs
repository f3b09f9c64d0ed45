//! Stage execution for the storyreel pipeline.
//!
//! - [`TaskDispatcher`] -- runs one claimed stage and performs its terminal
//!   stage-record write.
//! - [`PipelineRunner`] -- runs all five stages in order, skipping those
//!   already completed.
//! - [`PipelineEngine`] -- the command surface (start, retry, pause,
//!   rollback, ...) used by the HTTP API.
//! - [`JobRegistry`] -- job handles and per-project cancellation tokens.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod registry;
pub mod runner;

pub use config::WorkerConfig;
pub use dispatcher::{StageOutcome, TaskDispatcher};
pub use engine::{PipelineEngine, ProjectAssets, ProjectOverview};
pub use registry::{JobHandle, JobRegistry, JobState, JobStatus};
pub use runner::{PipelineRunner, PipelineSummary};
