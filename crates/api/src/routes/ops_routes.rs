use crate::App;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

pub fn router() -> Router<Arc<App>> {
    Router::new()
        .route("/status", get(status))
        .route("/alerts", get(alerts))
        .route("/readiness", get(readiness))
        .route("/metrics", get(metrics))
}

/// Live operational diagnostics for every backend subsystem.
async fn status(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let snapshot = app.ops_snapshot().await;
    let alerts = app.ops.evaluate_and_notify(&snapshot).await;

    let count = |severity: ops::Severity| alerts.iter().filter(|a| a.severity == severity).count();
    let summary = serde_json::json!({
        "total": alerts.len(),
        "critical": count(ops::Severity::Critical),
        "warning": count(ops::Severity::Warning),
        "info": count(ops::Severity::Info),
    });
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "queue": snapshot.queue,
        "websocket": snapshot.websocket,
        "forex": snapshot.forex,
        "alerts": alerts,
        "alert_summary": summary,
    }))
}

/// Active threshold alerts.
async fn alerts(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let snapshot = app.ops_snapshot().await;
    let alerts = app.ops.evaluate_and_notify(&snapshot).await;
    let total = alerts.len();
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "alerts": alerts,
        "total": total,
    }))
}

/// Readiness of the critical runtime dependencies.
async fn readiness(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let queue_required = app.config.task_queue_enabled;
    let queue_ok = !queue_required || app.queue.stats().started;
    let kv_required = app.kv.is_enabled();
    let kv_ok = !kv_required || app.kv.is_connected().await;

    let ready = queue_ok && kv_ok;
    Json(serde_json::json!({
        "ready": ready,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "checks": {
            "queue": { "required": queue_required, "ok": queue_ok },
            "kv_store": { "required": kv_required, "ok": kv_ok },
            "websocket_manager": {
                "required": true,
                "ok": true,
                "forex_stream_running": app.streamer.is_running(),
            },
        },
    }))
}

/// Prometheus text exposition of the ops snapshot.
async fn metrics(State(app): State<Arc<App>>) -> axum::response::Response {
    let snapshot = app.ops_snapshot().await;
    let alerts = app.ops.evaluate_and_notify(&snapshot).await;
    let body = ops::render_prometheus(&snapshot, &alerts);
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
        .into_response()
}

use axum::response::IntoResponse;
