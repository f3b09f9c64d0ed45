pub mod health;
pub mod jobs;
pub mod projects;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /health                                          health check
///
/// /projects                                        create (POST)
/// /projects/{id}                                   project with stage records
/// /projects/{id}/pipeline                          run every stage (POST)
/// /projects/{id}/pause                             pause (POST)
/// /projects/{id}/resume                            resume (POST)
/// /projects/{id}/assets                            generated images and videos
/// /projects/{id}/stream                            WebSocket, whole project
/// /projects/{id}/stages/{stage}                    update stage data (PUT)
/// /projects/{id}/stages/{stage}/execute            start stage (POST)
/// /projects/{id}/stages/{stage}/retry              retry failed stage (POST)
/// /projects/{id}/stages/{stage}/rollback           reset stage and downstream (POST)
/// /projects/{id}/stages/{stage}/stream             WebSocket, one stage
///
/// /jobs/{job_id}                                   job status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/projects", projects::router())
        .nest("/jobs", jobs::router())
}
