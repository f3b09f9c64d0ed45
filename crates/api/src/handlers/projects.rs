//! Handlers for project-level commands.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use storyreel_core::error::CoreError;
use storyreel_core::records::NewProject;
use storyreel_core::types::DbId;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/projects
///
/// Creates the project and its five `pending` stage records.
pub async fn create_project(
    State(state): State<AppState>,
    Json(input): Json<NewProject>,
) -> AppResult<impl IntoResponse> {
    if input.name.trim().is_empty() {
        return Err(CoreError::Validation("Project name must not be empty".into()).into());
    }
    let project = state.engine.create_project(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: project })))
}

/// GET /api/v1/projects/{id}
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let overview = state.engine.project_overview(project_id).await?;
    Ok(Json(DataResponse { data: overview }))
}

/// POST /api/v1/projects/{id}/pipeline
///
/// Starts every stage that is not yet completed, in order. Returns 202
/// with the job handle; progress arrives on the project stream.
pub async fn run_pipeline(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.run_pipeline(project_id).await?;
    tracing::info!(project_id, job_id = %job.job_id, "Pipeline run accepted");
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

/// POST /api/v1/projects/{id}/pause
pub async fn pause_project(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let project = state.engine.pause(project_id).await?;
    Ok(Json(DataResponse { data: project }))
}

/// POST /api/v1/projects/{id}/resume
pub async fn resume_project(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let project = state.engine.resume(project_id).await?;
    Ok(Json(DataResponse { data: project }))
}

/// GET /api/v1/projects/{id}/assets
pub async fn list_assets(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let assets = state.engine.assets(project_id).await?;
    Ok(Json(DataResponse { data: assets }))
}
