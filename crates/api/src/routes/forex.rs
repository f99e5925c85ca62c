use crate::error::ApiError;
use crate::App;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use models::ForecastHorizon;
use std::sync::Arc;

pub fn router() -> Router<Arc<App>> {
    Router::new()
        .route("/rates", get(rates))
        .route("/news", get(news))
        .route("/sentiment", get(sentiment))
        .route("/forecast/:pair", get(forecast))
        .route("/stream/start", post(stream_start))
        .route("/stream/stop", post(stream_stop))
}

async fn rates(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let rates = app.forex.get_rates().await;
    Json(serde_json::json!({
        "rates": rates,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn news(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let news = app.forex.get_news().await;
    Json(serde_json::json!({
        "news": news,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn sentiment(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let sentiment = app.forex.get_sentiment().await;
    Json(serde_json::json!({
        "sentiment": sentiment,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, serde::Deserialize)]
struct ForecastQuery {
    horizon: Option<String>,
}

async fn forecast(
    State(app): State<Arc<App>>,
    Path(pair): Path<String>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<models::ForecastResult>, ApiError> {
    let horizon = query
        .horizon
        .as_deref()
        .map(ForecastHorizon::parse)
        .unwrap_or_default();
    let forecast = app.forex.forecast_pair(&pair, horizon).await?;
    Ok(Json(forecast))
}

async fn stream_start(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    app.streamer
        .start(app.stream_source(), app.config.forex_stream_interval);
    Json(serde_json::json!({
        "message": "Forex stream started",
        "running": true,
        "interval_seconds": app.streamer.interval().as_secs(),
    }))
}

async fn stream_stop(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    app.streamer.stop();
    Json(serde_json::json!({
        "message": "Forex stream stopped",
        "running": false,
    }))
}
