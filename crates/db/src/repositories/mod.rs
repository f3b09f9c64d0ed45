//! Repository layer.
//!
//! Each repository is a zero-sized struct of async query functions. They
//! accept any [`sqlx::PgExecutor`], so the same query runs against the pool
//! or inside a transaction, and return raw `sqlx` results.

pub mod asset_repo;
pub mod catalog_repo;
pub mod project_repo;
pub mod stage_repo;

pub use asset_repo::{ImageRepo, VideoRepo};
pub use catalog_repo::{GlobalVariableRepo, ProjectProviderRepo, ProviderRepo, TemplateRepo};
pub use project_repo::ProjectRepo;
pub use stage_repo::StageRepo;
