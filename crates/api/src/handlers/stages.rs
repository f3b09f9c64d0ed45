//! Handlers for commands addressed to one stage of a project.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use storyreel_core::types::DbId;

use crate::error::{AppError, AppResult};
use crate::handlers::parse_stage;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteStageRequest {
    /// Replaces the stage input before the run.
    #[serde(default)]
    pub input: Option<Value>,
    /// Restrict a per-scene stage to these scenes.
    #[serde(default)]
    pub scene_numbers: Option<Vec<i32>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStageRequest {
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
}

/// POST /api/v1/projects/{id}/stages/{stage}/execute
///
/// Validates preconditions, stores the optional input override, claims the
/// stage and starts it in the background. Returns 202 with the job handle.
pub async fn execute_stage(
    State(state): State<AppState>,
    Path((project_id, stage)): Path<(DbId, String)>,
    Json(body): Json<ExecuteStageRequest>,
) -> AppResult<impl IntoResponse> {
    let stage = parse_stage(&stage)?;
    let job = state
        .engine
        .start_stage(project_id, stage, body.input, body.scene_numbers)
        .await?;
    tracing::info!(project_id, stage = %stage, job_id = %job.job_id, "Stage run accepted");
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

/// POST /api/v1/projects/{id}/stages/{stage}/retry
pub async fn retry_stage(
    State(state): State<AppState>,
    Path((project_id, stage)): Path<(DbId, String)>,
) -> AppResult<impl IntoResponse> {
    let stage = parse_stage(&stage)?;
    let job = state.engine.retry_stage(project_id, stage).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

/// POST /api/v1/projects/{id}/stages/{stage}/rollback
///
/// Resets the stage and everything after it to `pending`.
pub async fn rollback_stage(
    State(state): State<AppState>,
    Path((project_id, stage)): Path<(DbId, String)>,
) -> AppResult<impl IntoResponse> {
    let stage = parse_stage(&stage)?;
    let records = state.engine.rollback(project_id, stage).await?;
    Ok(Json(DataResponse { data: records }))
}

/// PUT /api/v1/projects/{id}/stages/{stage}
///
/// Operator correction of a stage's payloads. At least one of `input` and
/// `output` must be given.
pub async fn update_stage(
    State(state): State<AppState>,
    Path((project_id, stage)): Path<(DbId, String)>,
    Json(body): Json<UpdateStageRequest>,
) -> AppResult<impl IntoResponse> {
    let stage = parse_stage(&stage)?;
    if body.input.is_none() && body.output.is_none() {
        return Err(AppError::BadRequest(
            "Provide at least one of input and output".into(),
        ));
    }
    let record = state
        .engine
        .update_stage_data(project_id, stage, body.input, body.output)
        .await?;
    Ok(Json(DataResponse { data: record }))
}
