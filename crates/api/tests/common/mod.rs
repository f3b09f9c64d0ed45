#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use storyreel_backends::FixedBackends;
use storyreel_core::records::ProviderConfig;
use storyreel_core::stage::BackendKind;
use storyreel_events::ProgressHub;
use storyreel_worker::{PipelineEngine, WorkerConfig};
use tower::ServiceExt;

use storyreel_api::config::ServerConfig;
use storyreel_api::router::build_app_router;
use storyreel_api::services;
use storyreel_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults and mock providers.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: None,
        ws_heartbeat_secs: 30,
        providers: [BackendKind::Text, BackendKind::Image, BackendKind::Video]
            .into_iter()
            .map(ProviderConfig::mock)
            .collect(),
    }
}

fn app_from(state: AppState) -> Router {
    let config = state.config.clone();
    build_app_router(state, &config).expect("test config has valid origins")
}

/// Build the full application router on the in-memory store.
///
/// The returned router owns one engine; clone it for every request so the
/// requests share state.
pub fn build_test_app() -> Router {
    let config = test_config();
    let pipeline_services =
        services::memory_services(&config.providers, Arc::new(FixedBackends::mocks()));
    let engine = PipelineEngine::new(
        pipeline_services,
        ProgressHub::default(),
        &WorkerConfig::default(),
    );

    app_from(AppState {
        engine,
        pool: None,
        config: Arc::new(config),
    })
}

/// Build the full application router on PostgreSQL.
pub async fn build_pg_test_app(pool: PgPool) -> Router {
    let config = test_config();
    let pipeline_services = services::postgres_services(
        pool.clone(),
        &config.providers,
        Arc::new(FixedBackends::mocks()),
    )
    .await
    .unwrap();
    let engine = PipelineEngine::new(
        pipeline_services,
        ProgressHub::default(),
        &WorkerConfig::default(),
    );

    app_from(AppState {
        engine,
        pool: Some(pool),
        config: Arc::new(config),
    })
}

/// Serve `app` on an ephemeral local port and return its address.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    send_json(app, Method::POST, uri, body).await
}

pub async fn put_json(app: Router, uri: &str, body: Value) -> Response {
    send_json(app, Method::PUT, uri, body).await
}

async fn send_json(app: Router, method: Method, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Domain helpers
// ---------------------------------------------------------------------------

/// Create a project and return its id.
pub async fn create_project(app: &Router, name: &str) -> i64 {
    let response = post_json(
        app.clone(),
        "/api/v1/projects",
        serde_json::json!({
            "name": name,
            "original_topic": "a lighthouse keeper who collects lost letters",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}

/// Poll a job until it reaches a terminal state and return its status body.
pub async fn wait_for_job(app: &Router, job_id: &str) -> Value {
    for _ in 0..500 {
        let response = get(app.clone(), &format!("/api/v1/jobs/{job_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await["data"].clone();
        if matches!(job["state"].as_str(), Some("succeeded" | "failed" | "cancelled")) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} did not finish");
}

/// Start a stage over HTTP and wait for its job to finish.
pub async fn run_stage(app: &Router, project_id: i64, stage: &str) -> Value {
    let response = post_json(
        app.clone(),
        &format!("/api/v1/projects/{project_id}/stages/{stage}/execute"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED, "starting {stage}");
    let job_id = body_json(response).await["data"]["job_id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_for_job(app, &job_id).await
}
