use crate::App;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use connections::{Outbound, SessionHandle};
use futures::{SinkExt, StreamExt};
use models::{UpdateType, GLOBAL_TOPIC};
use std::sync::Arc;

/// Duplex endpoint for the reserved global topic.
pub async fn ws_global(State(app): State<Arc<App>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(app, socket, GLOBAL_TOPIC.to_string()))
}

/// Duplex endpoint subscribed to one task's topic.
pub async fn ws_task(
    State(app): State<Arc<App>>,
    Path(task_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(app, socket, task_id))
}

async fn handle_socket(app: Arc<App>, socket: WebSocket, topic: String) {
    let SessionHandle {
        connection_id,
        mut outbound,
    } = app.manager.accept(&topic, None);

    let (mut sink, mut stream) = socket.split();

    // The writer task is the session's single socket writer: frames drain in
    // enqueue order, so per-session delivery is totally ordered.
    let manager = app.manager.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let (text, is_ping) = match &message {
                Outbound::Frame(frame) => {
                    let Ok(text) = serde_json::to_string(frame) else {
                        continue;
                    };
                    (text, frame.update_type == UpdateType::Ping)
                }
                Outbound::Text(text) => (text.clone(), false),
            };
            if sink.send(Message::Text(text)).await.is_err() {
                manager.disconnect(connection_id, Some("send_failure"));
                return;
            }
            // A delivered ping proves nothing about the peer; only client
            // traffic refreshes liveness.
            if !is_ping {
                manager.touch(connection_id);
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) if text.trim() == "ping" => {
                app.manager.pong(connection_id);
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => app.manager.touch(connection_id),
        }
    }

    app.manager.disconnect(connection_id, None);
    writer.abort();
}

/// Connection diagnostics: the live registry, preferring the shared store
/// when available so counts are coherent across instances.
pub async fn connection_diagnostics(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let registry = app.manager.registry_snapshot(None).await;
    Json(serde_json::json!({
        "total_connections": app.manager.connection_count(None),
        "tasks": app.manager.topics(),
        "registry_size": registry.len(),
        "registry": registry,
    }))
}
