use crate::App;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// Service card served at the root.
pub async fn root(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Trading Copilot Backend",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online",
        "endpoints": {
            "websocket": "/api/ws/{task_id}",
            "create_task": "/api/tasks/create",
            "ops_status": "/api/ops/status",
        },
        "features": {
            "task_queue": app.config.task_queue_enabled,
            "forex_stream": app.config.forex_stream_enabled,
        },
    }))
}

/// Orchestrator liveness probe: must answer instantly with no dependencies.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "copilot-backend",
    }))
}

/// Unauthenticated API-side health summary.
pub async fn api_health(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "connections": app.manager.connection_count(None),
        "queue_started": app.queue.stats().started,
    }))
}
