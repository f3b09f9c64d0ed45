use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use storyreel_core::types::DbId;
use storyreel_events::Subscription;

use crate::error::AppResult;
use crate::handlers::parse_stage;
use crate::state::AppState;

/// GET /api/v1/projects/{id}/stream
///
/// Every message of the project until `pipeline_done` or `pipeline_error`.
pub async fn stream_project(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.engine.store().get_project(project_id).await?;
    let subscription = state.engine.hub().subscribe_project(project_id);
    let heartbeat = Duration::from_secs(state.config.ws_heartbeat_secs.max(1));
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription, heartbeat)))
}

/// GET /api/v1/projects/{id}/stages/{stage}/stream
///
/// One stage's messages until its `done` or `error`.
pub async fn stream_stage(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((project_id, stage)): Path<(DbId, String)>,
) -> AppResult<impl IntoResponse> {
    let stage = parse_stage(&stage)?;
    state.engine.store().get_project(project_id).await?;
    let subscription = state.engine.hub().subscribe_stage(project_id, stage);
    let heartbeat = Duration::from_secs(state.config.ws_heartbeat_secs.max(1));
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription, heartbeat)))
}

/// Drive one connection.
///
/// The subscription is taken before the upgrade so nothing published in
/// between is lost. A sender task forwards messages as JSON text frames and
/// pings on every heartbeat; the receive loop only watches for the client
/// going away. Whichever side finishes first ends the other.
async fn handle_socket(socket: WebSocket, mut subscription: Subscription, heartbeat: Duration) {
    let channel = subscription.key().to_string();
    tracing::info!(channel = %channel, "Progress stream connected");

    let (mut sink, mut stream) = socket.split();

    let sender_channel = channel.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        loop {
            tokio::select! {
                next = subscription.next() => {
                    let Some(msg) = next else { break };
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(channel = %sender_channel, error = %e, "Failed to encode progress message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        tracing::debug!(channel = %sender_channel, "WebSocket sink closed");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        return;
                    }
                }
            }
        }
        // Subscription ended: close from our side.
        let _ = sink.send(Message::Close(None)).await;
    });

    let recv_channel = channel.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Pong(_)) => {
                    tracing::trace!(channel = %recv_channel, "Pong received");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(channel = %recv_channel, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::info!(channel = %channel, "Progress stream disconnected");
}
