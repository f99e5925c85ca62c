pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod observe;
pub mod routes;
pub mod task_store;

pub use config::{Args, Config};
pub use error::{ApiError, ApiErrorExt};

use connections::{ConnectionManager, EventEmitter, ForexStreamer, ManagerConfig, StreamSource};
use forex_data::ForexDataService;
use futures::FutureExt;
use middleware::{RateLimiter, SlidingWindow};
use std::sync::Arc;
use task_queue::TaskQueue;
use task_store::{InMemoryTaskStore, TaskStore};

/// Shared application state: every subsystem constructed once at startup and
/// threaded through handlers explicitly. Teardown order is sessions → queue
/// → KV store.
pub struct App {
    pub config: Config,
    pub kv: Arc<kv_store::KvStore>,
    pub queue: TaskQueue,
    pub manager: Arc<ConnectionManager>,
    pub streamer: ForexStreamer,
    pub forex: Arc<ForexDataService>,
    pub ops: ops::OpsService,
    pub store: Arc<dyn TaskStore>,
    pub metrics: observe::RequestMetrics,
    pub health: observe::HealthChecker,
    pub limiter: Box<dyn RateLimiter>,
    pub auth_limiter: Box<dyn RateLimiter>,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let forex = Arc::new(ForexDataService::with_http_source(
            config.forex_config.clone(),
        )?);
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::default());
        Ok(Self::assemble(config, forex, store))
    }

    /// Assembly seam used by tests to substitute the rate source or store.
    pub fn assemble(
        config: Config,
        forex: Arc<ForexDataService>,
        store: Arc<dyn TaskStore>,
    ) -> Arc<Self> {
        let kv = Arc::new(kv_store::KvStore::new(config.kv_config.clone()));
        let queue = TaskQueue::new(kv.clone(), config.queue_config.clone());
        let manager = ConnectionManager::new(
            kv.clone(),
            ManagerConfig {
                heartbeat_interval: config.ws_heartbeat_interval,
                heartbeat_timeout: config.ws_heartbeat_timeout,
            },
        );
        let streamer = ForexStreamer::new(manager.clone());
        let ops = ops::OpsService::new(config.thresholds.clone(), config.webhook.clone());

        let health = observe::HealthChecker::default();
        {
            let kv = kv.clone();
            health.register("kv_store", move || {
                let kv = kv.clone();
                async move { !kv.is_enabled() || kv.is_connected().await }.boxed()
            });
        }
        {
            let queue = queue.clone();
            let required = config.task_queue_enabled;
            health.register("task_queue", move || {
                let started = queue.stats().started;
                async move { !required || started }.boxed()
            });
        }

        let limiter = Box::new(SlidingWindow::new(
            config.rate_limit_max,
            config.rate_limit_window,
        ));
        let auth_limiter = Box::new(SlidingWindow::new(
            config.auth_rate_limit_max,
            config.auth_rate_limit_window,
        ));

        Arc::new(App {
            config,
            kv,
            queue,
            manager,
            streamer,
            forex,
            ops,
            store,
            metrics: observe::RequestMetrics::default(),
            health,
            limiter,
            auth_limiter,
        })
    }

    /// The periodic-broadcast payload source handed to the streamer.
    pub fn stream_source(self: &Arc<Self>) -> Arc<dyn StreamSource> {
        Arc::new(ForexStreamSource(self.forex.clone()))
    }

    /// Start the queue and (optionally) the global forex stream.
    pub async fn start_background(self: &Arc<Self>) {
        if self.config.task_queue_enabled {
            register_task_handlers(self);
            self.queue
                .start(self.config.task_queue_workers, self.config.task_queue_max_size)
                .await;
        }
        if self.config.forex_stream_enabled {
            self.streamer
                .start(self.stream_source(), self.config.forex_stream_interval);
        }
    }

    /// Ordered teardown: stop accepting stream traffic, drain workers,
    /// release the KV connection.
    pub async fn shutdown(self: &Arc<Self>) {
        self.streamer.stop();
        if self.config.task_queue_enabled {
            self.queue.stop().await;
        }
        self.kv.close().await;
    }

    /// Compose the ops snapshot over the queue, registry, and forex state.
    pub async fn ops_snapshot(&self) -> ops::OpsSnapshot {
        let queue = self.queue.stats();
        let registry = self.manager.registry_snapshot(None).await;
        let stale_after = self.config.thresholds.ws_stale_after;
        let stale_connections = ops::count_stale(&registry, stale_after);
        ops::OpsSnapshot {
            queue,
            websocket: ops::WsStats {
                total_connections: self.manager.connection_count(None),
                tasks: self.manager.topics(),
                registry_size: registry.len(),
                registry,
                stale_after_seconds: stale_after.as_secs(),
                stale_connections,
                forex_stream_running: self.streamer.is_running(),
                forex_stream_interval_seconds: self.streamer.interval().as_secs(),
            },
            forex: self.forex.runtime_stats().await,
        }
    }
}

struct ForexStreamSource(Arc<ForexDataService>);

#[async_trait::async_trait]
impl StreamSource for ForexStreamSource {
    async fn payload(&self) -> serde_json::Value {
        self.0.stream_payload().await
    }

    async fn backoff(&self) -> std::time::Duration {
        self.0.backoff_remaining().await
    }
}

/// Register the three task-kind handlers with the queue so both backends
/// can dispatch them by name.
pub fn register_task_handlers(app: &Arc<App>) {
    use models::TaskKind;

    for kind in [
        TaskKind::MarketAnalysis,
        TaskKind::AutoTrade,
        TaskKind::Forecast,
    ] {
        let queue = app.queue.clone();
        let app = app.clone();
        queue.register_handler(kind.handler_name(), move |args| {
            let ctx = handlers::TaskContext {
                emitter: app.manager.clone() as Arc<dyn EventEmitter>,
                store: app.store.clone(),
                forex: app.forex.clone(),
            };
            handlers::dispatch(ctx, kind, args).boxed()
        });
    }
}

/// Build the full router with the middleware chain in its significant order:
/// correlation id → envelope → security headers → size limit → auth rate
/// limit → global rate limit → token verification → CORS (request-traversal
/// order; responses walk back in reverse).
pub fn build_router(app: Arc<App>) -> axum::Router {
    use axum::middleware::{from_fn, from_fn_with_state};
    use axum::routing::get;

    let cors = cors_layer(&app.config);

    axum::Router::new()
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health))
        .route("/healthz", get(routes::health::healthz))
        .route("/api/health", get(routes::health::api_health))
        .nest("/api/tasks", routes::tasks::router())
        .nest("/api/forex", routes::forex::router())
        .nest("/api/ops", routes::ops_routes::router())
        .nest("/api/monitoring", routes::monitoring::router())
        .route("/api/updates/connections", get(routes::ws::connection_diagnostics))
        .route("/api/ws", get(routes::ws::ws_global))
        .route("/api/ws/:task_id", get(routes::ws::ws_task))
        .layer(
            tower::ServiceBuilder::new()
                .layer(from_fn_with_state(app.clone(), observe::track_requests))
                .layer(from_fn(middleware::correlation_id))
                .layer(from_fn(middleware::wrap_envelope))
                .layer(from_fn_with_state(app.clone(), middleware::security_headers))
                .layer(from_fn_with_state(app.clone(), middleware::payload_size_limit))
                .layer(from_fn_with_state(app.clone(), middleware::auth_rate_limit))
                .layer(from_fn_with_state(app.clone(), middleware::global_rate_limit))
                .layer(from_fn_with_state(app.clone(), middleware::verify_token))
                .layer(cors),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

fn cors_layer(config: &Config) -> tower_http::cors::CorsLayer {
    use tower_http::cors::{AllowOrigin, Any, CorsLayer};

    if config.cors_allow_all {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(Any)
            .max_age(config.cors_max_age);
    }

    let allow_origin = if config.debug {
        // Development accepts localhost and 127.0.0.1 on any port alongside
        // the configured origins, so dev servers need no CORS configuration.
        let origins = config.cors_origins.clone();
        AllowOrigin::predicate(move |origin, _request_parts| {
            origin
                .to_str()
                .map(|origin| {
                    origins.iter().any(|allowed| allowed == origin)
                        || is_local_dev_origin(origin)
                })
                .unwrap_or(false)
        })
    } else {
        let parsed: Vec<axum::http::HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(allow_origin)
        .max_age(config.cors_max_age)
}

/// Matches `http(s)://localhost[:port]` and `http(s)://127.0.0.1[:port]`
/// for any numeric port.
fn is_local_dev_origin(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (rest, None),
    };
    if host != "localhost" && host != "127.0.0.1" {
        return false;
    }
    match port {
        None => true,
        Some(port) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_dev_origins_match_any_port() {
        assert!(is_local_dev_origin("http://localhost"));
        assert!(is_local_dev_origin("http://localhost:3000"));
        assert!(is_local_dev_origin("http://localhost:4200"));
        assert!(is_local_dev_origin("https://127.0.0.1:9000"));
        assert!(is_local_dev_origin("http://127.0.0.1"));

        assert!(!is_local_dev_origin("http://localhost.evil.com"));
        assert!(!is_local_dev_origin("http://evil-localhost:3000"));
        assert!(!is_local_dev_origin("http://localhost:30a0"));
        assert!(!is_local_dev_origin("http://localhost:"));
        assert!(!is_local_dev_origin("https://app.example.com"));
        assert!(!is_local_dev_origin("localhost:3000"));
    }
}
