use chrono::{DateTime, Utc};
use models::{EventFrame, UpdateType, GLOBAL_TOPIC};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Messages handed to a session's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(EventFrame),
    /// Raw text, used for the literal "pong" heartbeat reply.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(10);
        Self {
            heartbeat_interval,
            heartbeat_timeout: heartbeat_interval * 4,
        }
    }
}

/// Metadata tracked per live session.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub connection_id: Uuid,
    pub topic: String,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl SessionMeta {
    fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "connection_id": self.connection_id.to_string(),
            "topic": self.topic,
            "user_id": self.user_id,
            "connected_at": self.connected_at.to_rfc3339(),
            "last_seen": self.last_seen.to_rfc3339(),
        })
    }
}

struct SessionEntry {
    meta: SessionMeta,
    /// Monotonic twin of `meta.last_seen`; liveness decisions never trust
    /// the wall clock.
    last_seen_monotonic: tokio::time::Instant,
    tx: tokio::sync::mpsc::UnboundedSender<Outbound>,
}

#[derive(Default)]
struct Sessions {
    by_topic: HashMap<String, HashSet<Uuid>>,
    all: HashSet<Uuid>,
    registry: HashMap<Uuid, SessionEntry>,
}

/// What `accept` hands back to the socket route: the session id plus the
/// receiver its writer task must drain.
pub struct SessionHandle {
    pub connection_id: Uuid,
    pub outbound: tokio::sync::mpsc::UnboundedReceiver<Outbound>,
}

pub struct ConnectionManager {
    kv: Arc<kv_store::KvStore>,
    config: ManagerConfig,
    sessions: Mutex<Sessions>,
}

impl ConnectionManager {
    pub fn new(kv: Arc<kv_store::KvStore>, config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            kv,
            config,
            sessions: Mutex::new(Sessions::default()),
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    /// Register a new session under `topic`, send its welcome frame, and
    /// start its heartbeat. The caller drains `SessionHandle::outbound`.
    pub fn accept(self: &Arc<Self>, topic: &str, user_id: Option<String>) -> SessionHandle {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        let now = Utc::now();
        let meta = SessionMeta {
            connection_id,
            topic: topic.to_string(),
            user_id,
            connected_at: now,
            last_seen: now,
        };

        let total = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions
                .by_topic
                .entry(topic.to_string())
                .or_default()
                .insert(connection_id);
            sessions.all.insert(connection_id);
            sessions.registry.insert(
                connection_id,
                SessionEntry {
                    meta: meta.clone(),
                    last_seen_monotonic: tokio::time::Instant::now(),
                    tx: tx.clone(),
                },
            );
            sessions.all.len()
        };
        tracing::info!(%connection_id, topic, total, "session connected");

        // Best-effort mirror into the shared registry.
        let kv = self.kv.clone();
        let meta_value = meta.to_value();
        let id_string = connection_id.to_string();
        tokio::spawn(async move {
            kv.set_connection(&id_string, &meta_value).await;
        });

        let welcome = EventFrame::new(
            topic,
            format!("Connected to live updates for task: {topic}"),
            UpdateType::Success,
        );
        let _ = tx.send(Outbound::Frame(welcome));

        self.spawn_heartbeat(connection_id);

        SessionHandle {
            connection_id,
            outbound: rx,
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>, connection_id: Uuid) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(manager.config.heartbeat_interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let _instant = ticks.tick().await; // Discard immediate first tick.

            loop {
                let _instant = ticks.tick().await;

                let (topic, last_seen, tx) = {
                    let sessions = manager.sessions.lock().unwrap();
                    let Some(entry) = sessions.registry.get(&connection_id) else {
                        return; // Session is gone; the heartbeat dies with it.
                    };
                    (
                        entry.meta.topic.clone(),
                        entry.last_seen_monotonic,
                        entry.tx.clone(),
                    )
                };

                if last_seen.elapsed() > manager.config.heartbeat_timeout {
                    manager.disconnect(connection_id, Some("heartbeat_timeout"));
                    return;
                }

                if tx.send(Outbound::Frame(EventFrame::ping(&topic))).is_err() {
                    manager.disconnect(connection_id, Some("send_failure"));
                    return;
                }
            }
        });
    }

    /// Remove a session from every index. Idempotent: a second call for the
    /// same id is a no-op and mutates nothing.
    pub fn disconnect(&self, connection_id: Uuid, reason: Option<&str>) {
        let removed = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(entry) = sessions.registry.remove(&connection_id) else {
                return;
            };
            let topic = entry.meta.topic.clone();
            if let Some(members) = sessions.by_topic.get_mut(&topic) {
                members.remove(&connection_id);
                if members.is_empty() {
                    sessions.by_topic.remove(&topic);
                }
            }
            sessions.all.remove(&connection_id);
            (topic, sessions.all.len())
        };
        tracing::info!(
            %connection_id,
            topic = %removed.0,
            remaining = removed.1,
            reason = reason.unwrap_or("client_close"),
            "session disconnected"
        );

        let kv = self.kv.clone();
        let id_string = connection_id.to_string();
        tokio::spawn(async move {
            kv.remove_connection(&id_string).await;
        });
    }

    /// Refresh a session's liveness stamp.
    pub fn touch(&self, connection_id: Uuid) {
        let last_seen = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(entry) = sessions.registry.get_mut(&connection_id) else {
                return;
            };
            entry.meta.last_seen = Utc::now();
            entry.last_seen_monotonic = tokio::time::Instant::now();
            entry.meta.last_seen
        };

        let kv = self.kv.clone();
        let id_string = connection_id.to_string();
        tokio::spawn(async move {
            let mut updates = serde_json::Map::new();
            updates.insert(
                "last_seen".to_string(),
                serde_json::Value::String(last_seen.to_rfc3339()),
            );
            kv.patch_connection(&id_string, &updates).await;
        });
    }

    /// Reply to a client's literal "ping" text.
    pub fn pong(&self, connection_id: Uuid) {
        self.touch(connection_id);
        let tx = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .registry
                .get(&connection_id)
                .map(|entry| entry.tx.clone())
        };
        if let Some(tx) = tx {
            if tx.send(Outbound::Text("pong".to_string())).is_err() {
                self.disconnect(connection_id, Some("send_failure"));
            }
        }
    }

    /// Fan a frame out to every session subscribed to `topic`. Iterates a
    /// snapshot so concurrent disconnects are tolerated; any enqueue failure
    /// disconnects that session alone.
    pub fn send(&self, topic: &str, frame: EventFrame) {
        let targets: Vec<(Uuid, tokio::sync::mpsc::UnboundedSender<Outbound>)> = {
            let sessions = self.sessions.lock().unwrap();
            let Some(members) = sessions.by_topic.get(topic) else {
                return;
            };
            members
                .iter()
                .filter_map(|id| {
                    sessions
                        .registry
                        .get(id)
                        .map(|entry| (*id, entry.tx.clone()))
                })
                .collect()
        };

        for (connection_id, tx) in targets {
            if tx.send(Outbound::Frame(frame.clone())).is_err() {
                self.disconnect(connection_id, Some("send_failure"));
            }
        }
    }

    /// Write a frame to a single session.
    pub fn send_to(&self, connection_id: Uuid, frame: EventFrame) {
        let tx = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .registry
                .get(&connection_id)
                .map(|entry| entry.tx.clone())
        };
        if let Some(tx) = tx {
            if tx.send(Outbound::Frame(frame)).is_err() {
                self.disconnect(connection_id, Some("send_failure"));
            }
        }
    }

    /// Fan a frame out to every live session regardless of topic.
    pub fn broadcast_frame(&self, frame: EventFrame) {
        let targets: Vec<(Uuid, tokio::sync::mpsc::UnboundedSender<Outbound>)> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .all
                .iter()
                .filter_map(|id| {
                    sessions
                        .registry
                        .get(id)
                        .map(|entry| (*id, entry.tx.clone()))
                })
                .collect()
        };
        for (connection_id, tx) in targets {
            if tx.send(Outbound::Frame(frame.clone())).is_err() {
                self.disconnect(connection_id, Some("send_failure"));
            }
        }
    }

    pub fn connection_count(&self, topic: Option<&str>) -> usize {
        let sessions = self.sessions.lock().unwrap();
        match topic {
            Some(topic) => sessions
                .by_topic
                .get(topic)
                .map(|members| members.len())
                .unwrap_or(0),
            None => sessions.all.len(),
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap();
        sessions.by_topic.keys().cloned().collect()
    }

    /// Local registry copy, optionally filtered by topic.
    pub fn local_registry(&self, topic: Option<&str>) -> HashMap<String, serde_json::Value> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .registry
            .values()
            .filter(|entry| topic.map_or(true, |t| entry.meta.topic == t))
            .map(|entry| {
                (
                    entry.meta.connection_id.to_string(),
                    entry.meta.to_value(),
                )
            })
            .collect()
    }

    /// Registry snapshot, preferring the shared hash when the KV store is
    /// reachable so diagnostics are coherent across instances.
    pub async fn registry_snapshot(
        &self,
        topic: Option<&str>,
    ) -> HashMap<String, serde_json::Value> {
        if self.kv.ensure_connected().await {
            return self.kv.registry(topic).await;
        }
        self.local_registry(topic)
    }
}

/// The capability surface task handlers publish through. Handlers receive an
/// `Arc<dyn EventEmitter>` at enqueue time and never name the manager type.
#[async_trait::async_trait]
pub trait EventEmitter: Send + Sync {
    async fn send_update(
        &self,
        task_id: &str,
        message: &str,
        kind: UpdateType,
        progress: Option<f64>,
        data: Option<serde_json::Value>,
    );

    async fn send_progress(&self, task_id: &str, step: &str, progress: f64, message: &str) {
        self.send_update(
            task_id,
            &format!("{step}: {message}"),
            UpdateType::Progress,
            Some(progress),
            Some(serde_json::json!({ "step": step })),
        )
        .await;
    }

    async fn send_complete(&self, task_id: &str, result: serde_json::Value) {
        self.send_update(
            task_id,
            "Task completed successfully!",
            UpdateType::Success,
            Some(1.0),
            Some(result),
        )
        .await;
    }

    async fn send_error(&self, task_id: &str, error_message: &str) {
        self.send_update(
            task_id,
            &format!("Error: {error_message}"),
            UpdateType::Error,
            None,
            None,
        )
        .await;
    }
}

#[async_trait::async_trait]
impl EventEmitter for ConnectionManager {
    async fn send_update(
        &self,
        task_id: &str,
        message: &str,
        kind: UpdateType,
        progress: Option<f64>,
        data: Option<serde_json::Value>,
    ) {
        let mut frame = EventFrame::new(task_id, message, kind);
        frame.progress = progress;
        frame.data = data;
        if task_id == GLOBAL_TOPIC {
            self.broadcast_frame(frame);
        } else {
            self.send(task_id, frame);
        }
    }
}
