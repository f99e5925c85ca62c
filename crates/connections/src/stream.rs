use crate::ConnectionManager;
use models::{EventFrame, UpdateType, GLOBAL_TOPIC};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Producer of the periodic live-update payload broadcast to "global".
#[async_trait::async_trait]
pub trait StreamSource: Send + Sync + 'static {
    async fn payload(&self) -> serde_json::Value;

    /// Extra delay requested by the source while its upstream is failing.
    async fn backoff(&self) -> Duration {
        Duration::ZERO
    }
}

/// Owns the single background task which streams live market data to every
/// connected session. While no sessions exist the task sleeps and re-checks
/// rather than exiting, so a subscriber arriving later resumes delivery.
pub struct ForexStreamer {
    manager: Arc<ConnectionManager>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    interval_secs: AtomicU64,
}

impl ForexStreamer {
    pub const MIN_INTERVAL: Duration = Duration::from_secs(2);

    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            task: Mutex::new(None),
            interval_secs: AtomicU64::new(10),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.load(Ordering::Relaxed))
    }

    /// Start (or restart with a new interval) the streaming task.
    pub fn start(&self, source: Arc<dyn StreamSource>, interval: Duration) {
        let interval = interval.max(Self::MIN_INTERVAL);
        if self.is_running() && interval == self.interval() {
            tracing::debug!("forex stream already running");
            return;
        }
        self.stop();
        self.interval_secs
            .store(interval.as_secs(), Ordering::Relaxed);

        let manager = self.manager.clone();
        let handle = tokio::spawn(async move {
            loop {
                if manager.connection_count(None) == 0 {
                    tokio::time::sleep(interval).await;
                    continue;
                }

                let payload = source.payload().await;
                let frame = EventFrame::new(
                    GLOBAL_TOPIC,
                    "Live forex market update received",
                    UpdateType::Info,
                )
                .with_data(payload);
                manager.broadcast_frame(frame);

                // Stretch the cadence while the upstream is backing off.
                let sleep = interval.max(source.backoff().await);
                tokio::time::sleep(sleep).await;
            }
        });
        *self.task.lock().unwrap() = Some(handle);
        tracing::info!(interval_seconds = interval.as_secs(), "forex stream started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            tracing::info!("forex stream stopped");
        }
    }
}

impl Drop for ForexStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManagerConfig, Outbound};

    struct StaticSource;

    #[async_trait::async_trait]
    impl StreamSource for StaticSource {
        async fn payload(&self) -> serde_json::Value {
            serde_json::json!({ "rates": { "EUR/USD": 1.08 } })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stream_broadcasts_to_live_sessions() {
        let manager = ConnectionManager::new(
            Arc::new(kv_store::KvStore::disabled()),
            ManagerConfig::default(),
        );
        let streamer = ForexStreamer::new(manager.clone());

        let mut handle = manager.accept(GLOBAL_TOPIC, None);
        handle.outbound.recv().await.unwrap(); // welcome

        streamer.start(Arc::new(StaticSource), Duration::from_secs(2));
        assert!(streamer.is_running());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let mut saw_update = false;
        while let Ok(Outbound::Frame(frame)) = handle.outbound.try_recv() {
            if frame.data.is_some() {
                assert_eq!(frame.data.unwrap()["rates"]["EUR/USD"], 1.08);
                saw_update = true;
                break;
            }
        }
        assert!(saw_update);

        streamer.stop();
        assert!(!streamer.is_running());
    }

    #[tokio::test]
    async fn interval_is_clamped_to_the_floor() {
        let manager = ConnectionManager::new(
            Arc::new(kv_store::KvStore::disabled()),
            ManagerConfig::default(),
        );
        let streamer = ForexStreamer::new(manager);
        streamer.start(Arc::new(StaticSource), Duration::from_secs(0));
        assert_eq!(streamer.interval(), ForexStreamer::MIN_INTERVAL);
        streamer.stop();
    }
}
