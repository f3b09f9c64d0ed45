//! HTTP-level integration tests for the project, stage and job endpoints.
//!
//! Uses Axum's tower::ServiceExt to send requests directly to the router
//! without an actual TCP listener. Generation runs against the mock backends.

mod common;

use axum::http::StatusCode;
use common::{body_json, create_project, get, post_json, put_json, run_stage, wait_for_job};
use serde_json::json;
use sqlx::PgPool;

fn stage_status<'a>(project: &'a serde_json::Value, stage: &str) -> &'a str {
    project["stages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["stage"] == stage)
        .and_then(|s| s["status"].as_str())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_project_returns_201_with_pending_stages() {
    let app = common::build_test_app();
    let id = create_project(&app, "Letters").await;

    let response = get(app, &format!("/api/v1/projects/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["name"], "Letters");
    assert_eq!(json["data"]["status"], "draft");
    let stages = json["data"]["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 5);
    assert_eq!(stages[0]["stage"], "rewrite");
    assert_eq!(stages[4]["stage"], "video_generation");
    assert!(stages.iter().all(|s| s["status"] == "pending"));
}

#[tokio::test]
async fn create_project_with_blank_name_returns_400() {
    let app = common::build_test_app();
    let response = post_json(
        app,
        "/api/v1/projects",
        json!({"name": "  ", "original_topic": "anything"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn get_nonexistent_project_returns_404() {
    let app = common::build_test_app();
    let response = get(app, "/api/v1/projects/999999").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(json["error"].is_string());
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_rewrite_completes_the_stage() {
    let app = common::build_test_app();
    let id = create_project(&app, "Rewrite").await;

    let job = run_stage(&app, id, "rewrite").await;
    assert_eq!(job["state"], "succeeded");
    assert_eq!(job["stage"], "rewrite");

    let project = body_json(get(app, &format!("/api/v1/projects/{id}")).await).await;
    assert_eq!(stage_status(&project["data"], "rewrite"), "completed");
    assert_eq!(stage_status(&project["data"], "storyboard"), "pending");
    assert_eq!(project["data"]["status"], "draft");
}

#[tokio::test]
async fn execute_returns_job_handle_with_stage_channel() {
    let app = common::build_test_app();
    let id = create_project(&app, "Handle").await;

    let response = post_json(
        app.clone(),
        &format!("/api/v1/projects/{id}/stages/rewrite/execute"),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let job = body_json(response).await["data"].clone();
    assert_eq!(job["project_id"], id);
    assert!(job["channel"].as_str().unwrap().ends_with(":stage:rewrite"));
    wait_for_job(&app, job["job_id"].as_str().unwrap()).await;
}

#[tokio::test]
async fn storyboard_before_rewrite_returns_400() {
    let app = common::build_test_app();
    let id = create_project(&app, "Too early").await;

    let response = post_json(
        app,
        &format!("/api/v1/projects/{id}/stages/storyboard/execute"),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_stage_returns_400() {
    let app = common::build_test_app();
    let id = create_project(&app, "Unknown stage").await;

    let response = post_json(
        app,
        &format!("/api/v1/projects/{id}/stages/colour_grading/execute"),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn retry_of_pending_stage_returns_409() {
    let app = common::build_test_app();
    let id = create_project(&app, "Nothing to retry").await;

    let response = post_json(
        app,
        &format!("/api/v1/projects/{id}/stages/rewrite/retry"),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn update_stage_without_payload_returns_400() {
    let app = common::build_test_app();
    let id = create_project(&app, "Empty update").await;

    let response = put_json(app, &format!("/api/v1/projects/{id}/stages/rewrite"), json!({})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_stage_replaces_input() {
    let app = common::build_test_app();
    let id = create_project(&app, "Edited").await;

    let response = put_json(
        app,
        &format!("/api/v1/projects/{id}/stages/rewrite"),
        json!({"input": {"topic": "a kite that refuses to land"}}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await["data"].clone();
    assert_eq!(record["input"]["topic"], "a kite that refuses to land");
    assert_eq!(record["status"], "pending");
}

#[tokio::test]
async fn rollback_resets_stage_and_downstream() {
    let app = common::build_test_app();
    let id = create_project(&app, "Rolled back").await;
    assert_eq!(run_stage(&app, id, "rewrite").await["state"], "succeeded");
    assert_eq!(run_stage(&app, id, "storyboard").await["state"], "succeeded");

    let response = post_json(
        app.clone(),
        &format!("/api/v1/projects/{id}/stages/storyboard/rollback"),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let reset = body_json(response).await["data"].as_array().unwrap().len();
    assert_eq!(reset, 4);

    let project = body_json(get(app, &format!("/api/v1/projects/{id}")).await).await;
    assert_eq!(stage_status(&project["data"], "rewrite"), "completed");
    assert_eq!(stage_status(&project["data"], "storyboard"), "pending");
    assert_eq!(stage_status(&project["data"], "video_generation"), "pending");
}

// ---------------------------------------------------------------------------
// Pause / resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_of_draft_project_returns_409() {
    let app = common::build_test_app();
    let id = create_project(&app, "Idle").await;

    let response = post_json(app, &format!("/api/v1/projects/{id}/pause"), json!({})).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn resume_of_draft_project_returns_409() {
    let app = common::build_test_app();
    let id = create_project(&app, "Not paused").await;

    let response = post_json(app, &format!("/api/v1/projects/{id}/resume"), json!({})).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Pipeline and assets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pipeline_run_completes_project_and_produces_assets() {
    let app = common::build_test_app();
    let id = create_project(&app, "Full run").await;

    let response = post_json(app.clone(), &format!("/api/v1/projects/{id}/pipeline"), json!({})).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job = body_json(response).await["data"].clone();
    assert!(job["stage"].is_null());

    let finished = wait_for_job(&app, job["job_id"].as_str().unwrap()).await;
    assert_eq!(finished["state"], "succeeded");

    let project = body_json(get(app.clone(), &format!("/api/v1/projects/{id}")).await).await;
    assert_eq!(project["data"]["status"], "completed");
    assert!(project["data"]["stages"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["status"] == "completed"));

    let assets = body_json(get(app, &format!("/api/v1/projects/{id}/assets")).await).await;
    let images = assets["data"]["images"].as_array().unwrap();
    let videos = assets["data"]["videos"].as_array().unwrap();
    assert!(!images.is_empty());
    assert_eq!(images.len(), videos.len());
    assert!(videos.iter().all(|v| v["image_id"].is_number()));
}

#[tokio::test]
async fn assets_of_unknown_project_returns_404() {
    let app = common::build_test_app();
    let response = get(app, "/api/v1/projects/424242/assets").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = common::build_test_app();
    let response = get(app, "/api/v1/jobs/00000000-0000-0000-0000-000000000000").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_job_id_returns_400() {
    let app = common::build_test_app();
    let response = get(app, "/api/v1/jobs/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// PostgreSQL-backed server
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn rewrite_runs_against_postgres(pool: PgPool) {
    let app = common::build_pg_test_app(pool).await;
    let id = create_project(&app, "Persisted").await;

    let job = run_stage(&app, id, "rewrite").await;
    assert_eq!(job["state"], "succeeded");

    let project = body_json(get(app, &format!("/api/v1/projects/{id}")).await).await;
    assert_eq!(stage_status(&project["data"], "rewrite"), "completed");
    assert!(project["data"]["stages"][0]["output"].is_object());
}
