//! Domain model for the storyreel generation pipeline.
//!
//! Everything in this crate is free of network and database I/O:
//!
//! - [`stage`] -- the five pipeline stages, their order and dependencies.
//! - [`status`] -- status enums and the stage state machine.
//! - [`scene`] -- the Scene Dataset threaded through stage payloads.
//! - [`storyboard`] -- JSON extraction and storyboard parsing.
//! - [`template`] -- prompt rendering and variable layering.
//! - [`records`] -- persisted record types.
//! - [`store`] / [`catalog`] -- persistence and configuration seams.
//! - [`memory_store`] -- in-process [`store::PipelineStore`] implementation.

pub mod catalog;
pub mod error;
pub mod memory_store;
pub mod records;
pub mod scene;
pub mod stage;
pub mod status;
pub mod store;
pub mod storyboard;
pub mod template;
pub mod types;
