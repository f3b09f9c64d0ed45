use std::sync::Arc;

use storyreel_worker::PipelineEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the engine is a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub engine: PipelineEngine,
    /// `None` when running on the in-memory store.
    pub pool: Option<storyreel_db::DbPool>,
    pub config: Arc<ServerConfig>,
}
