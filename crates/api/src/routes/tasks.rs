use crate::error::{ApiError, ApiErrorExt};
use crate::extract::{AuthContext, Request};
use crate::handlers::{step_names, TaskArgs};
use crate::task_store::TaskStore as _;
use crate::App;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use connections::EventEmitter;
use models::{Priority, TaskKind, TaskRecord, TaskStatus, UpdateType};
use std::sync::Arc;
use validator::Validate;

pub fn router() -> Router<Arc<App>> {
    Router::new()
        .route("/create", post(create_task))
        .route("/", get(list_tasks))
        .route("/:id", get(get_task).delete(delete_task))
        .route("/:id/stop", post(stop_task))
        .route("/:id/pause", post(pause_task))
        .route("/:id/resume", post(resume_task))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub currency_pairs: Vec<String>,
    #[serde(default)]
    pub auto_trade_enabled: bool,
    #[serde(default)]
    pub user_limits: Option<trading::UserLimits>,
    #[serde(default)]
    pub analysis_period_hours: Option<u32>,
    #[serde(default)]
    pub include_forecast: bool,
    #[serde(default)]
    pub forecast_horizon_hours: Option<u32>,
}

async fn create_task(
    State(app): State<Arc<App>>,
    auth: AuthContext,
    Request(body): Request<CreateTaskRequest>,
) -> Result<Json<TaskRecord>, ApiError> {
    let task_id = uuid::Uuid::new_v4().to_string();
    let currency_pairs = if body.currency_pairs.is_empty() {
        vec!["EUR/USD".to_string()]
    } else {
        body.currency_pairs.clone()
    };

    let record = TaskRecord::new(
        task_id.clone(),
        Some(auth.user_id.clone()),
        body.title,
        body.description,
        body.priority,
        step_names(body.task_type),
    );
    app.store.insert(record).await?;
    let record = app
        .store
        .set_status(&task_id, TaskStatus::Running)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))?;

    let args = TaskArgs {
        task_id: task_id.clone(),
        user_id: Some(auth.user_id.clone()),
        currency_pairs,
        user_limits: body.user_limits,
        include_forecast: body.include_forecast,
        forecast_horizon_hours: body.forecast_horizon_hours,
        analysis_period_hours: body.analysis_period_hours,
    };
    let accepted = app
        .queue
        .enqueue(
            &format!("task:{task_id}"),
            body.task_type.handler_name(),
            serde_json::to_value(&args).map_err(anyhow::Error::from)?,
        )
        .await;
    if !accepted {
        let _ = app.store.set_status(&task_id, TaskStatus::Failed).await;
        return Err(anyhow::anyhow!("Task queue is not accepting work")
            .with_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    Ok(Json(record))
}

async fn list_tasks(
    State(app): State<Arc<App>>,
    auth: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tasks = app.store.list_for_user(&auth.user_id).await?;
    let total = tasks.len();
    Ok(Json(serde_json::json!({ "tasks": tasks, "total": total })))
}

async fn get_task(
    State(app): State<Arc<App>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    Ok(Json(owned_task(&app, &auth, &id).await?))
}

async fn delete_task(
    State(app): State<Arc<App>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    owned_task(&app, &auth, &id).await?;
    let deleted = app.store.delete(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted, "id": id })))
}

async fn stop_task(
    State(app): State<Arc<App>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    transition(
        app,
        auth,
        id,
        TaskStatus::Completed,
        UpdateType::Warning,
        "Task stopped by user",
    )
    .await
}

async fn pause_task(
    State(app): State<Arc<App>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    transition(
        app,
        auth,
        id,
        TaskStatus::Paused,
        UpdateType::Warning,
        "Task paused by user",
    )
    .await
}

async fn resume_task(
    State(app): State<Arc<App>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    transition(
        app,
        auth,
        id,
        TaskStatus::Running,
        UpdateType::Info,
        "Task resumed by user",
    )
    .await
}

async fn transition(
    app: Arc<App>,
    auth: AuthContext,
    id: String,
    status: TaskStatus,
    kind: UpdateType,
    message: &str,
) -> Result<Json<TaskRecord>, ApiError> {
    owned_task(&app, &auth, &id).await?;
    let record = app
        .store
        .set_status(&id, status)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    app.manager
        .send_update(&id, message, kind, None, None)
        .await;
    Ok(Json(record))
}

/// Fetch a task and enforce ownership. Unknown ids are 404; another user's
/// task is 403.
async fn owned_task(app: &App, auth: &AuthContext, id: &str) -> Result<TaskRecord, ApiError> {
    let record = app
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    if record.user_id.as_deref() != Some(auth.user_id.as_str()) {
        return Err(ApiError::forbidden());
    }
    Ok(record)
}
