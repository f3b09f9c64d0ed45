use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{projects, stages};
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/projects`.
///
/// ```text
/// POST   /                                 -> create_project
/// GET    /{id}                             -> get_project
/// POST   /{id}/pipeline                    -> run_pipeline
/// POST   /{id}/pause                       -> pause_project
/// POST   /{id}/resume                      -> resume_project
/// GET    /{id}/assets                      -> list_assets
/// GET    /{id}/stream                      -> stream_project (WebSocket)
/// PUT    /{id}/stages/{stage}              -> update_stage
/// POST   /{id}/stages/{stage}/execute      -> execute_stage
/// POST   /{id}/stages/{stage}/retry        -> retry_stage
/// POST   /{id}/stages/{stage}/rollback     -> rollback_stage
/// GET    /{id}/stages/{stage}/stream       -> stream_stage (WebSocket)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(projects::create_project))
        .route("/{id}", get(projects::get_project))
        .route("/{id}/pipeline", post(projects::run_pipeline))
        .route("/{id}/pause", post(projects::pause_project))
        .route("/{id}/resume", post(projects::resume_project))
        .route("/{id}/assets", get(projects::list_assets))
        .route("/{id}/stream", get(ws::stream_project))
        .route("/{id}/stages/{stage}", put(stages::update_stage))
        .route("/{id}/stages/{stage}/execute", post(stages::execute_stage))
        .route("/{id}/stages/{stage}/retry", post(stages::retry_stage))
        .route("/{id}/stages/{stage}/rollback", post(stages::rollback_stage))
        .route("/{id}/stages/{stage}/stream", get(ws::stream_stage))
}
