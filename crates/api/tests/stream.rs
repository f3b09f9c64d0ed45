//! WebSocket progress streams against a real listener.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use common::{create_project, post_json};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::Message;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, path: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("WebSocket handshake failed");
    socket
}

/// Collect JSON text frames until the server closes the connection.
async fn collect_frames(mut socket: Socket) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(10), async move {
        let mut frames = Vec::new();
        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Text(text)) => frames.push(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        frames
    })
    .await
    .expect("stream was not closed by the server")
}

#[tokio::test]
async fn stage_stream_ends_with_done_and_close() {
    let app = common::build_test_app();
    let addr = common::spawn_server(app.clone()).await;
    let id = create_project(&app, "Streamed").await;

    let socket = connect(addr, &format!("/api/v1/projects/{id}/stages/rewrite/stream")).await;

    let response = post_json(
        app,
        &format!("/api/v1/projects/{id}/stages/rewrite/execute"),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let frames = collect_frames(socket).await;
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f["project_id"] == id));
    assert!(frames.iter().any(|f| f["type"] == "token"));

    let last = frames.last().unwrap();
    assert_eq!(last["type"], "done");
    assert_eq!(last["stage"], "rewrite");
}

#[tokio::test]
async fn project_stream_ends_with_pipeline_done() {
    let app = common::build_test_app();
    let addr = common::spawn_server(app.clone()).await;
    let id = create_project(&app, "Whole pipeline").await;

    let socket = connect(addr, &format!("/api/v1/projects/{id}/stream")).await;

    let response = post_json(app, &format!("/api/v1/projects/{id}/pipeline"), json!({})).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let frames = collect_frames(socket).await;
    let done_stages: Vec<&str> = frames
        .iter()
        .filter(|f| f["type"] == "done")
        .filter_map(|f| f["stage"].as_str())
        .collect();
    assert_eq!(
        done_stages,
        ["rewrite", "storyboard", "image_generation", "camera_movement", "video_generation"]
    );

    let last = frames.last().unwrap();
    assert_eq!(last["type"], "pipeline_done");
    assert_eq!(last["stage"], "*");
}

#[tokio::test]
async fn stream_for_unknown_project_is_rejected() {
    let app = common::build_test_app();
    let addr = common::spawn_server(app).await;

    let result = connect_async(format!("ws://{addr}/api/v1/projects/9999/stream")).await;
    assert!(result.is_err(), "handshake should fail for a missing project");
}

#[tokio::test]
async fn stage_stream_only_carries_its_own_stage() {
    let app = common::build_test_app();
    let addr = common::spawn_server(app.clone()).await;
    let id = create_project(&app, "Second stage").await;
    assert_eq!(common::run_stage(&app, id, "rewrite").await["state"], "succeeded");

    let socket = connect(addr, &format!("/api/v1/projects/{id}/stages/storyboard/stream")).await;
    let response = post_json(
        app,
        &format!("/api/v1/projects/{id}/stages/storyboard/execute"),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let frames = collect_frames(socket).await;
    assert!(frames.iter().all(|f| f["stage"] == "storyboard" || f["stage"] == "*"));
    let last = frames.last().unwrap();
    assert_eq!(last["type"], "done");
    assert_eq!(last["metadata"]["scene_count"], 3);
}
