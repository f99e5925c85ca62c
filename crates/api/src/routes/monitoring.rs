use crate::middleware::RequestId;
use crate::App;
use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router};
use std::sync::Arc;

pub fn router() -> Router<Arc<App>> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/live", get(health_live))
        .route("/trace", get(trace))
        .route("/endpoints", get(endpoints))
        .route("/performance", get(performance))
        .route("/diagnostics", get(diagnostics))
}

/// Request latency percentiles, error rates, and per-endpoint statistics.
async fn metrics(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "metrics": app.metrics.summary(),
    }))
}

/// Detailed health check of registered dependencies.
async fn health(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let checks = app.health.run_all().await;
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "ready": app.health.is_ready(),
        "checks": checks,
    }))
}

async fn health_ready(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    app.health.run_all().await;
    Json(serde_json::json!({ "ready": app.health.is_ready() }))
}

async fn health_live() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "alive": true }))
}

/// Correlation information for the current request.
async fn trace(request_id: Option<Extension<RequestId>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "trace": {
            "trace_id": request_id.map(|Extension(id)| id.0),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        },
    }))
}

async fn endpoints(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let summary = app.metrics.summary();
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "endpoints": summary.get("endpoints").cloned().unwrap_or_default(),
    }))
}

async fn performance(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let summary = app.metrics.summary();
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "performance": {
            "request_latency_ms": summary.get("request_latency_ms").cloned().unwrap_or_default(),
            "error_rate": summary.get("error_rate").cloned().unwrap_or_default(),
        },
    }))
}

/// Everything at once, for troubleshooting.
async fn diagnostics(
    State(app): State<Arc<App>>,
    request_id: Option<Extension<RequestId>>,
) -> Json<serde_json::Value> {
    let summary = app.metrics.summary();
    let checks = app.health.run_all().await;
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "system": {
            "total_requests": summary.get("total_requests").cloned().unwrap_or_default(),
            "success_count": summary.get("success_count").cloned().unwrap_or_default(),
            "error_count": summary.get("error_count").cloned().unwrap_or_default(),
            "error_rate": summary.get("error_rate").cloned().unwrap_or_default(),
        },
        "performance": {
            "request_latency_ms": summary.get("request_latency_ms").cloned().unwrap_or_default(),
        },
        "dependencies": checks,
        "ready": app.health.is_ready(),
        "current_trace_id": request_id.map(|Extension(id)| id.0),
    }))
}
