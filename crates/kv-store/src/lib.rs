//! Optional shared key-value store gateway.
//!
//! Queue backends use lists (RPUSH / BLPOP) and the connection registry is a
//! hash keyed by connection id. Every operation degrades to a `false` / `None`
//! sentinel when the store is unreachable: callers fall back to their local
//! state and a connect cooldown prevents connection storms.

use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct KvConfig {
    pub enabled: bool,
    pub url: String,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub retry: Duration,
    /// Hash key under which session registry entries are mirrored.
    pub registry_key: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379/0".to_string(),
            connect_timeout: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(2),
            retry: Duration::from_secs(5),
            registry_key: "copilot:ws:registry".to_string(),
        }
    }
}

#[derive(Default)]
struct ConnState {
    client: Option<redis::aio::MultiplexedConnection>,
    next_attempt: Option<Instant>,
}

pub struct KvStore {
    config: KvConfig,
    state: tokio::sync::Mutex<ConnState>,
}

impl KvStore {
    pub fn new(config: KvConfig) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(ConnState::default()),
        }
    }

    /// A store that never connects; used where the KV layer is optional.
    pub fn disabled() -> Self {
        Self::new(KvConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.client.is_some()
    }

    /// Probe the store at most once per cooldown window, caching the
    /// connection on success. Returns whether a live connection is held.
    pub async fn ensure_connected(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut state = self.state.lock().await;
        if state.client.is_some() {
            return true;
        }
        if let Some(next_attempt) = state.next_attempt {
            if Instant::now() < next_attempt {
                return false;
            }
        }

        match self.connect().await {
            Ok(client) => {
                tracing::info!(url = %self.config.url, "connected to shared KV store");
                state.client = Some(client);
                state.next_attempt = None;
                true
            }
            Err(error) => {
                state.next_attempt = Some(Instant::now() + self.config.retry);
                tracing::warn!(
                    %error,
                    retry_seconds = self.config.retry.as_secs(),
                    "KV store connection failed"
                );
                false
            }
        }
    }

    async fn connect(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut conn = client
            .get_multiplexed_tokio_connection_with_response_timeouts(
                self.config.socket_timeout,
                self.config.connect_timeout,
            )
            .await?;
        () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(conn)
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        if !self.ensure_connected().await {
            return None;
        }
        self.state.lock().await.client.clone()
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.client.take().is_some() {
            tracing::info!("KV store connection closed");
        }
    }

    /// Append a JSON item to the tail of the list at `key`.
    pub async fn push(&self, key: &str, item: &serde_json::Value) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let payload = item.to_string();
        match conn.rpush::<_, _, ()>(key, payload).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, key, "failed to push queue item");
                false
            }
        }
    }

    /// Blocking head-pop with a bounded wait; `None` on timeout or error.
    pub async fn pop(&self, key: &str, timeout: Duration) -> Option<serde_json::Value> {
        let mut conn = self.connection().await?;
        let timeout_secs = timeout.as_secs().max(1) as f64;
        let result: Result<Option<(String, String)>, _> = conn.blpop(key, timeout_secs).await;
        match result {
            Ok(Some((_key, raw))) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) if value.is_object() => Some(value),
                Ok(_) | Err(_) => None,
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%error, key, "failed to pop queue item");
                None
            }
        }
    }

    pub async fn llen(&self, key: &str) -> usize {
        let Some(mut conn) = self.connection().await else {
            return 0;
        };
        match conn.llen::<_, i64>(key).await {
            Ok(length) => length.max(0) as usize,
            Err(_) => 0,
        }
    }

    /// Write a registry entry for `connection_id`, stamping the id into the
    /// stored payload so cross-instance readers don't need the hash field.
    pub async fn set_connection(&self, connection_id: &str, metadata: &serde_json::Value) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let mut payload = metadata.clone();
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "connection_id".to_string(),
                serde_json::Value::String(connection_id.to_string()),
            );
        }
        match conn
            .hset::<_, _, _, ()>(&self.config.registry_key, connection_id, payload.to_string())
            .await
        {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, connection_id, "failed to set registry entry");
                false
            }
        }
    }

    /// Merge `updates` into the stored registry entry for `connection_id`.
    pub async fn patch_connection(
        &self,
        connection_id: &str,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };

        let existing: Option<String> = match conn.hget(&self.config.registry_key, connection_id).await
        {
            Ok(existing) => existing,
            Err(error) => {
                tracing::warn!(%error, connection_id, "failed to read registry entry");
                return false;
            }
        };

        let mut payload = existing
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .filter(serde_json::Value::is_object)
            .unwrap_or_else(|| serde_json::json!({}));
        let map = payload.as_object_mut().expect("payload is an object");
        for (key, value) in updates {
            map.insert(key.clone(), value.clone());
        }
        map.insert(
            "connection_id".to_string(),
            serde_json::Value::String(connection_id.to_string()),
        );

        match conn
            .hset::<_, _, _, ()>(&self.config.registry_key, connection_id, payload.to_string())
            .await
        {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, connection_id, "failed to patch registry entry");
                false
            }
        }
    }

    pub async fn remove_connection(&self, connection_id: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match conn
            .hdel::<_, _, ()>(&self.config.registry_key, connection_id)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, connection_id, "failed to remove registry entry");
                false
            }
        }
    }

    /// The shared registry snapshot, optionally filtered to one topic.
    /// Empty on any failure so diagnostics degrade to local state.
    pub async fn registry(&self, topic: Option<&str>) -> HashMap<String, serde_json::Value> {
        let Some(mut conn) = self.connection().await else {
            return HashMap::new();
        };
        let entries: HashMap<String, String> =
            match conn.hgetall(&self.config.registry_key).await {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::warn!(%error, "failed to fetch shared registry");
                    return HashMap::new();
                }
            };

        entries
            .into_iter()
            .filter_map(|(connection_id, raw)| {
                let parsed = serde_json::from_str::<serde_json::Value>(&raw).ok()?;
                if !parsed.is_object() {
                    return None;
                }
                if let Some(topic) = topic {
                    if parsed.get("topic").and_then(|t| t.as_str()) != Some(topic) {
                        return None;
                    }
                }
                Some((connection_id, parsed))
            })
            .collect()
    }
}
