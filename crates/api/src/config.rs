use clap::Parser;
use std::time::Duration;

/// Real-time task orchestration backend for the trading copilot.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// The port to listen on for API and WebSocket requests.
    #[clap(long, default_value = "8080", env = "API_PORT")]
    pub api_port: u16,
    /// Run with development affordances (localhost CORS, auth optional).
    #[clap(long, env = "DEBUG")]
    pub debug: bool,

    /// HS256 secret used to verify bearer tokens. Required in production.
    #[clap(long, env = "AUTH_JWT_SECRET")]
    pub auth_jwt_secret: Option<String>,

    /// Start the periodic global market-data broadcast at startup.
    #[clap(long, env = "FOREX_STREAM_ENABLED")]
    pub forex_stream_enabled: bool,
    #[clap(long, default_value = "10", env = "FOREX_STREAM_INTERVAL")]
    pub forex_stream_interval: u64,
    /// Upstream USD-quoted rate source.
    #[clap(
        long,
        default_value = "https://api.exchangerate-api.com/v4/latest/USD",
        env = "FOREX_RATES_URL"
    )]
    pub forex_rates_url: String,
    #[clap(long, default_value = "3", env = "FOREX_RATES_MIN_FETCH_INTERVAL_SECONDS")]
    pub forex_min_fetch_interval_seconds: u64,

    #[clap(long, value_parser = humantime::parse_duration, default_value = "10s", env = "WS_HEARTBEAT_INTERVAL")]
    pub ws_heartbeat_interval: Duration,
    #[clap(long, value_parser = humantime::parse_duration, default_value = "40s", env = "WS_HEARTBEAT_TIMEOUT")]
    pub ws_heartbeat_timeout: Duration,

    #[clap(long, env = "TASK_QUEUE_ENABLED")]
    pub task_queue_enabled: bool,
    #[clap(long, default_value = "memory", env = "TASK_QUEUE_BACKEND")]
    pub task_queue_backend: String,
    #[clap(long, default_value = "2", env = "TASK_QUEUE_WORKERS")]
    pub task_queue_workers: usize,
    #[clap(long, default_value = "200", env = "TASK_QUEUE_MAX_SIZE")]
    pub task_queue_max_size: usize,
    #[clap(long, default_value = "copilot:task_queue", env = "TASK_QUEUE_KV_KEY")]
    pub task_queue_kv_key: String,

    #[clap(long, env = "KV_ENABLED")]
    pub kv_enabled: bool,
    #[clap(long, default_value = "redis://127.0.0.1:6379/0", env = "KV_URL")]
    pub kv_url: String,
    #[clap(long, default_value = "2", env = "KV_CONNECT_TIMEOUT_SECONDS")]
    pub kv_connect_timeout_seconds: u64,
    #[clap(long, default_value = "2", env = "KV_SOCKET_TIMEOUT_SECONDS")]
    pub kv_socket_timeout_seconds: u64,
    #[clap(long, default_value = "5", env = "KV_RETRY_SECONDS")]
    pub kv_retry_seconds: u64,

    #[clap(long, default_value = "true", env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: bool,
    #[clap(long, default_value = "120", env = "RATE_LIMIT_MAX")]
    pub rate_limit_max: usize,
    #[clap(long, default_value = "60", env = "RATE_LIMIT_WINDOW_SECONDS")]
    pub rate_limit_window_seconds: u64,
    #[clap(long, default_value = "true", env = "AUTH_RATE_LIMIT_ENABLED")]
    pub auth_rate_limit_enabled: bool,
    #[clap(long, default_value = "10", env = "AUTH_RATE_LIMIT_MAX")]
    pub auth_rate_limit_max: usize,
    #[clap(long, default_value = "300", env = "AUTH_RATE_LIMIT_WINDOW_SECONDS")]
    pub auth_rate_limit_window_seconds: u64,

    /// Comma-separated allowed CORS origins.
    #[clap(long, default_value = "", env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
    #[clap(long, env = "CORS_ALLOW_ALL")]
    pub cors_allow_all: bool,
    #[clap(long, default_value = "86400", env = "CORS_MAX_AGE_SECONDS")]
    pub cors_max_age_seconds: u64,
    #[clap(long, default_value = "true", env = "ENABLE_CSP")]
    pub enable_csp: bool,
    /// Defaults to enabled outside debug.
    #[clap(long, env = "ENABLE_HSTS")]
    pub enable_hsts: Option<bool>,
    #[clap(long, default_value = "1048576", env = "MAX_REQUEST_BODY_BYTES")]
    pub max_request_body_bytes: u64,

    #[clap(long, default_value = "80", env = "OPS_ALERT_QUEUE_DEPTH_WARN")]
    pub ops_alert_queue_depth_warn: usize,
    #[clap(long, default_value = "150", env = "OPS_ALERT_QUEUE_DEPTH_CRIT")]
    pub ops_alert_queue_depth_crit: usize,
    #[clap(long, default_value = "1", env = "OPS_ALERT_QUEUE_FAILED_WARN")]
    pub ops_alert_queue_failed_warn: u64,
    #[clap(long, default_value = "120", env = "OPS_ALERT_WS_STALE_SECONDS")]
    pub ops_alert_ws_stale_seconds: u64,
    #[clap(long, default_value = "1", env = "OPS_ALERT_WS_STALE_COUNT_WARN")]
    pub ops_alert_ws_stale_count_warn: usize,
    #[clap(long, default_value = "3", env = "OPS_ALERT_FOREX_FAILURE_STREAK_WARN")]
    pub ops_alert_forex_failure_streak_warn: u32,
    #[clap(long, default_value = "20", env = "OPS_ALERT_FOREX_RETRY_WARN_SECONDS")]
    pub ops_alert_forex_retry_warn_seconds: f64,

    #[clap(long, env = "OPS_ALERT_WEBHOOK_URL")]
    pub ops_alert_webhook_url: Option<String>,
    /// discord | slack | generic; anything else infers from the URL.
    #[clap(long, default_value = "auto", env = "OPS_ALERT_WEBHOOK_PROVIDER")]
    pub ops_alert_webhook_provider: String,
    #[clap(long, default_value = "warning", env = "OPS_ALERT_WEBHOOK_MIN_SEVERITY")]
    pub ops_alert_webhook_min_severity: String,
    #[clap(long, default_value = "5", env = "OPS_ALERT_WEBHOOK_TIMEOUT_SECONDS")]
    pub ops_alert_webhook_timeout_seconds: u64,
    #[clap(long, env = "OPS_ALERT_WEBHOOK_AUTH_HEADER")]
    pub ops_alert_webhook_auth_header: Option<String>,
    #[clap(long, env = "OPS_ALERT_WEBHOOK_AUTH_VALUE")]
    pub ops_alert_webhook_auth_value: Option<String>,
}

/// Runtime configuration resolved from `Args`.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub debug: bool,
    pub auth_jwt_secret: Option<String>,
    pub forex_stream_enabled: bool,
    pub forex_stream_interval: Duration,
    pub forex_config: forex_data::ForexConfig,
    pub ws_heartbeat_interval: Duration,
    pub ws_heartbeat_timeout: Duration,
    pub task_queue_enabled: bool,
    pub queue_config: task_queue::QueueConfig,
    pub task_queue_workers: usize,
    pub task_queue_max_size: usize,
    pub kv_config: kv_store::KvConfig,
    pub rate_limit_enabled: bool,
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub auth_rate_limit_enabled: bool,
    pub auth_rate_limit_max: usize,
    pub auth_rate_limit_window: Duration,
    pub cors_origins: Vec<String>,
    pub cors_allow_all: bool,
    pub cors_max_age: Duration,
    pub enable_csp: bool,
    pub enable_hsts: bool,
    pub max_request_body_bytes: u64,
    pub thresholds: ops::AlertThresholds,
    pub webhook: ops::WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 8080,
            debug: true,
            auth_jwt_secret: None,
            forex_stream_enabled: false,
            forex_stream_interval: Duration::from_secs(10),
            forex_config: forex_data::ForexConfig::default(),
            ws_heartbeat_interval: Duration::from_secs(10),
            ws_heartbeat_timeout: Duration::from_secs(40),
            task_queue_enabled: false,
            queue_config: task_queue::QueueConfig::default(),
            task_queue_workers: 2,
            task_queue_max_size: 200,
            kv_config: kv_store::KvConfig::default(),
            rate_limit_enabled: true,
            rate_limit_max: 120,
            rate_limit_window: Duration::from_secs(60),
            auth_rate_limit_enabled: true,
            auth_rate_limit_max: 10,
            auth_rate_limit_window: Duration::from_secs(300),
            cors_origins: Vec::new(),
            cors_allow_all: false,
            cors_max_age: Duration::from_secs(86400),
            enable_csp: true,
            enable_hsts: false,
            max_request_body_bytes: 1_048_576,
            thresholds: ops::AlertThresholds::default(),
            webhook: ops::WebhookConfig::default(),
        }
    }
}

impl Config {
    pub fn from_args(args: Args) -> Self {
        let webhook_provider = match args.ops_alert_webhook_provider.as_str() {
            "discord" => Some(ops::Provider::Discord),
            "slack" => Some(ops::Provider::Slack),
            "generic" => Some(ops::Provider::Generic),
            _ => None,
        };
        let min_severity = match args.ops_alert_webhook_min_severity.as_str() {
            "info" => ops::Severity::Info,
            "critical" => ops::Severity::Critical,
            _ => ops::Severity::Warning,
        };
        let auth_header = match (
            args.ops_alert_webhook_auth_header,
            args.ops_alert_webhook_auth_value,
        ) {
            (Some(header), Some(value)) if !header.is_empty() && !value.is_empty() => {
                Some((header, value))
            }
            _ => None,
        };

        Self {
            api_port: args.api_port,
            debug: args.debug,
            auth_jwt_secret: args.auth_jwt_secret.filter(|s| !s.is_empty()),
            forex_stream_enabled: args.forex_stream_enabled,
            forex_stream_interval: Duration::from_secs(args.forex_stream_interval.max(1)),
            forex_config: forex_data::ForexConfig {
                source_url: args.forex_rates_url,
                min_fetch_interval: Duration::from_secs(
                    args.forex_min_fetch_interval_seconds.max(1),
                ),
                ..forex_data::ForexConfig::default()
            },
            ws_heartbeat_interval: args.ws_heartbeat_interval,
            ws_heartbeat_timeout: args.ws_heartbeat_timeout,
            task_queue_enabled: args.task_queue_enabled,
            queue_config: task_queue::QueueConfig {
                backend: if args.task_queue_backend.trim().eq_ignore_ascii_case("shared") {
                    task_queue::Backend::Shared
                } else {
                    task_queue::Backend::Memory
                },
                queue_key: args.task_queue_kv_key,
                ..task_queue::QueueConfig::default()
            },
            task_queue_workers: args.task_queue_workers.max(1),
            task_queue_max_size: args.task_queue_max_size.max(1),
            kv_config: kv_store::KvConfig {
                enabled: args.kv_enabled
                    || args.task_queue_backend.trim().eq_ignore_ascii_case("shared"),
                url: args.kv_url,
                connect_timeout: Duration::from_secs(args.kv_connect_timeout_seconds.max(1)),
                socket_timeout: Duration::from_secs(args.kv_socket_timeout_seconds.max(1)),
                retry: Duration::from_secs(args.kv_retry_seconds.max(1)),
                ..kv_store::KvConfig::default()
            },
            rate_limit_enabled: args.rate_limit_enabled,
            rate_limit_max: args.rate_limit_max.max(1),
            rate_limit_window: Duration::from_secs(args.rate_limit_window_seconds.max(1)),
            auth_rate_limit_enabled: args.auth_rate_limit_enabled,
            auth_rate_limit_max: args.auth_rate_limit_max.max(1),
            auth_rate_limit_window: Duration::from_secs(
                args.auth_rate_limit_window_seconds.max(1),
            ),
            cors_origins: args
                .cors_origins
                .into_iter()
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            cors_allow_all: args.cors_allow_all,
            cors_max_age: Duration::from_secs(args.cors_max_age_seconds),
            enable_csp: args.enable_csp,
            enable_hsts: args.enable_hsts.unwrap_or(!args.debug),
            max_request_body_bytes: args.max_request_body_bytes,
            thresholds: ops::AlertThresholds {
                queue_depth_warn: args.ops_alert_queue_depth_warn,
                queue_depth_crit: args.ops_alert_queue_depth_crit,
                queue_failed_warn: args.ops_alert_queue_failed_warn,
                ws_stale_after: Duration::from_secs(args.ops_alert_ws_stale_seconds.max(10)),
                ws_stale_count_warn: args.ops_alert_ws_stale_count_warn,
                forex_failure_streak_warn: args.ops_alert_forex_failure_streak_warn,
                forex_retry_warn_seconds: args.ops_alert_forex_retry_warn_seconds,
            },
            webhook: ops::WebhookConfig {
                url: args.ops_alert_webhook_url.filter(|url| !url.is_empty()),
                provider: webhook_provider,
                min_severity,
                timeout: Duration::from_secs(args.ops_alert_webhook_timeout_seconds.max(1)),
                auth_header,
            },
        }
    }

    /// Fail-fast startup validation. Production (non-debug) refuses to run
    /// without a token secret, with localhost CORS origins, or with
    /// non-HTTPS origins.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.debug {
            return Ok(());
        }

        if self.auth_jwt_secret.is_none() {
            anyhow::bail!("AUTH_JWT_SECRET must be configured in production");
        }
        if self.cors_allow_all {
            anyhow::bail!("CORS_ALLOW_ALL must not be set in production");
        }
        for origin in &self.cors_origins {
            let lowered = origin.to_ascii_lowercase();
            if lowered.contains("localhost") || lowered.contains("127.0.0.1") {
                anyhow::bail!("CORS_ORIGINS must not include localhost in production");
            }
            if !lowered.starts_with("https://") {
                anyhow::bail!("CORS origin must use HTTPS in production: {origin}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_skips_production_checks() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_requires_secret_and_https_origins() {
        let mut config = Config {
            debug: false,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        config.auth_jwt_secret = Some("secret".to_string());
        config.cors_origins = vec!["http://localhost:3000".to_string()];
        let error = config.validate().unwrap_err().to_string();
        assert!(error.contains("localhost"));

        config.cors_origins = vec!["http://app.example.com".to_string()];
        let error = config.validate().unwrap_err().to_string();
        assert!(error.contains("HTTPS"));

        config.cors_origins = vec!["https://app.example.com".to_string()];
        assert!(config.validate().is_ok());
    }
}
