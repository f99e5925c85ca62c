//! Bounded worker pool with a pluggable backend.
//!
//! The memory backend drains a bounded in-process FIFO and accepts arbitrary
//! boxed async jobs. The shared backend drains a KV-store list of JSON job
//! envelopes and only accepts handlers registered by name, because a closure
//! cannot cross a process boundary. Jobs run with at-least-once semantics and
//! a failure inside a job never aborts the pool; it is counted and logged at
//! the worker boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type JobFuture = futures::future::BoxFuture<'static, anyhow::Result<()>>;

/// A registered handler: invoked with the enqueued JSON args.
pub type HandlerFn = dyn Fn(serde_json::Value) -> JobFuture + Send + Sync;

/// A one-shot job for the memory backend.
pub type Job = Box<dyn FnOnce() -> JobFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Memory,
    Shared,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: Backend,
    pub queue_key: String,
    /// Bounded wait of one shared-backend blocking pop.
    pub block_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            queue_key: "copilot:task_queue".to_string(),
            block_timeout: Duration::from_secs(1),
        }
    }
}

struct MemoryJob {
    task_key: String,
    job: Job,
}

/// Point-in-time queue statistics, also served by the ops surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub started: bool,
    pub backend_requested: Backend,
    pub backend: Backend,
    pub workers: usize,
    pub max_size: usize,
    pub queue_size: usize,
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub registered_handlers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_key: Option<String>,
}

struct Inner {
    kv: Arc<kv_store::KvStore>,
    config: QueueConfig,
    started: AtomicBool,
    backend_active: Mutex<Backend>,
    worker_count: AtomicU64,
    max_size: AtomicU64,
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    /// Best-effort length of the shared list; authoritative length lives in
    /// the KV store and is re-read at start and stop.
    shared_size_estimate: AtomicI64,
    handlers: Mutex<HashMap<String, Arc<HandlerFn>>>,
    memory_tx: Mutex<Option<flume::Sender<Option<MemoryJob>>>>,
    workers: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    pub fn new(kv: Arc<kv_store::KvStore>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                kv,
                config,
                started: AtomicBool::new(false),
                backend_active: Mutex::new(Backend::Memory),
                worker_count: AtomicU64::new(0),
                max_size: AtomicU64::new(0),
                enqueued: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                shared_size_estimate: AtomicI64::new(0),
                handlers: Mutex::new(HashMap::new()),
                memory_tx: Mutex::new(None),
                workers: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a handler under `name` for dispatch by either backend.
    /// Blank names are ignored; re-registration replaces the prior handler.
    pub fn register_handler<F>(&self, name: &str, handler: F)
    where
        F: Fn(serde_json::Value) -> JobFuture + Send + Sync + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.inner
            .handlers
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(handler));
    }

    pub async fn start(&self, workers: usize, max_size: usize) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = workers.max(1);
        let max_size = max_size.max(1);

        let mut active = Backend::Memory;
        if self.inner.config.backend == Backend::Shared {
            if self.inner.kv.ensure_connected().await {
                active = Backend::Shared;
                let length = self.inner.kv.llen(&self.inner.config.queue_key).await;
                self.inner
                    .shared_size_estimate
                    .store(length as i64, Ordering::SeqCst);
            } else {
                tracing::warn!("shared queue backend unavailable; falling back to memory");
            }
        }
        *self.inner.backend_active.lock().unwrap() = active;
        self.inner.worker_count.store(workers as u64, Ordering::SeqCst);
        self.inner.max_size.store(max_size as u64, Ordering::SeqCst);

        if active == Backend::Memory {
            let (tx, rx) = flume::bounded::<Option<MemoryJob>>(max_size);
            *self.inner.memory_tx.lock().unwrap() = Some(tx);

            let mut handles = self.inner.workers.lock().await;
            for index in 0..workers {
                let rx = rx.clone();
                let inner = self.inner.clone();
                handles.push(tokio::spawn(async move {
                    memory_worker_loop(index, inner, rx).await;
                }));
            }
        } else {
            let mut handles = self.inner.workers.lock().await;
            for index in 0..workers {
                let inner = self.inner.clone();
                handles.push(tokio::spawn(async move {
                    shared_worker_loop(index, inner).await;
                }));
            }
        }

        tracing::info!(
            backend = ?active,
            requested = ?self.inner.config.backend,
            workers,
            max_size,
            "task queue started"
        );
    }

    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let backend = *self.inner.backend_active.lock().unwrap();
        if backend == Backend::Memory {
            let tx = self.inner.memory_tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                let workers = self.inner.worker_count.load(Ordering::SeqCst);
                for _ in 0..workers {
                    // One sentinel per worker terminates each loop.
                    if tx.send_async(None).await.is_err() {
                        break;
                    }
                }
            }
        }

        let mut handles = self.inner.workers.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        *self.inner.memory_tx.lock().unwrap() = None;

        if backend == Backend::Shared {
            let length = self.inner.kv.llen(&self.inner.config.queue_key).await;
            self.inner
                .shared_size_estimate
                .store(length as i64, Ordering::SeqCst);
        }
        tracing::info!("task queue stopped");
    }

    /// Enqueue a registered handler by name with JSON args.
    pub async fn enqueue(&self, task_key: &str, handler_name: &str, args: serde_json::Value) -> bool {
        if !self.inner.started.load(Ordering::SeqCst) {
            return false;
        }

        let handler = self
            .inner
            .handlers
            .lock()
            .unwrap()
            .get(handler_name)
            .cloned();
        let Some(handler) = handler else {
            tracing::warn!(task_key, handler_name, "no registered handler for task");
            return false;
        };

        let backend = *self.inner.backend_active.lock().unwrap();
        match backend {
            Backend::Shared => {
                let envelope = serde_json::json!({
                    "job_id": uuid::Uuid::new_v4().to_string(),
                    "task_key": task_key,
                    "handler": handler_name,
                    "args": args,
                    "enqueued_at": chrono::Utc::now().to_rfc3339(),
                });
                if !self.inner.kv.push(&self.inner.config.queue_key, &envelope).await {
                    return false;
                }
                self.inner.enqueued.fetch_add(1, Ordering::SeqCst);
                self.inner.shared_size_estimate.fetch_add(1, Ordering::SeqCst);
                true
            }
            Backend::Memory => {
                self.enqueue_memory(task_key, Box::new(move || handler(args)))
            }
        }
    }

    /// Enqueue an arbitrary one-shot job. Memory backend only: the shared
    /// backend cannot ship a closure to another process.
    pub fn enqueue_job(&self, task_key: &str, job: Job) -> bool {
        if !self.inner.started.load(Ordering::SeqCst) {
            return false;
        }
        if *self.inner.backend_active.lock().unwrap() == Backend::Shared {
            tracing::warn!(task_key, "shared backend requires a registered handler name");
            return false;
        }
        self.enqueue_memory(task_key, job)
    }

    fn enqueue_memory(&self, task_key: &str, job: Job) -> bool {
        let tx = self.inner.memory_tx.lock().unwrap().clone();
        let Some(tx) = tx else {
            return false;
        };
        let item = MemoryJob {
            task_key: task_key.to_string(),
            job,
        };
        match tx.try_send(Some(item)) {
            Ok(()) => {
                self.inner.enqueued.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(flume::TrySendError::Full(_)) => {
                tracing::warn!(task_key, "queue full, rejected task");
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn stats(&self) -> QueueStats {
        let backend = *self.inner.backend_active.lock().unwrap();
        let queue_size = match backend {
            Backend::Memory => self
                .inner
                .memory_tx
                .lock()
                .unwrap()
                .as_ref()
                .map(|tx| tx.len())
                .unwrap_or(0),
            Backend::Shared => {
                self.inner.shared_size_estimate.load(Ordering::SeqCst).max(0) as usize
            }
        };
        let mut registered_handlers: Vec<String> = self
            .inner
            .handlers
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        registered_handlers.sort();

        QueueStats {
            started: self.inner.started.load(Ordering::SeqCst),
            backend_requested: self.inner.config.backend,
            backend,
            workers: self.inner.worker_count.load(Ordering::SeqCst) as usize,
            max_size: self.inner.max_size.load(Ordering::SeqCst) as usize,
            queue_size,
            enqueued: self.inner.enqueued.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            registered_handlers,
            queue_key: (backend == Backend::Shared)
                .then(|| self.inner.config.queue_key.clone()),
        }
    }
}

async fn memory_worker_loop(
    worker: usize,
    inner: Arc<Inner>,
    rx: flume::Receiver<Option<MemoryJob>>,
) {
    while let Ok(item) = rx.recv_async().await {
        let Some(item) = item else {
            return; // Sentinel: drain is complete for this worker.
        };
        match (item.job)().await {
            Ok(()) => {
                inner.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(error) => {
                inner.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(worker, task_key = %item.task_key, %error, "queued task failed");
            }
        }
    }
}

async fn shared_worker_loop(worker: usize, inner: Arc<Inner>) {
    while inner.started.load(Ordering::SeqCst) {
        let Some(job) = inner
            .kv
            .pop(&inner.config.queue_key, inner.config.block_timeout)
            .await
        else {
            // Timed-out pop; re-check the started flag.
            tokio::task::yield_now().await;
            continue;
        };

        let previous = inner.shared_size_estimate.fetch_sub(1, Ordering::SeqCst);
        if previous <= 0 {
            inner.shared_size_estimate.store(0, Ordering::SeqCst);
        }

        let task_key = job
            .get("task_key")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let handler_name = job
            .get("handler")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let handler = inner.handlers.lock().unwrap().get(&handler_name).cloned();
        let Some(handler) = handler else {
            inner.failed.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(worker, %task_key, %handler_name, "missing handler for dequeued job");
            continue;
        };

        let args = job.get("args").cloned().unwrap_or(serde_json::Value::Null);
        match handler(args).await {
            Ok(()) => {
                inner.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(error) => {
                inner.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(worker, %task_key, %error, "queued task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn memory_queue() -> TaskQueue {
        TaskQueue::new(Arc::new(kv_store::KvStore::disabled()), QueueConfig::default())
    }

    #[tokio::test]
    async fn enqueue_returns_false_when_not_started() {
        let queue = memory_queue();
        assert!(!queue.enqueue_job("task:not-started", Box::new(|| async { Ok(()) }.boxed())));
    }

    #[tokio::test]
    async fn queue_executes_enqueued_jobs() {
        let queue = memory_queue();
        queue.start(1, 10).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<&'static str>();
        let accepted = queue.enqueue_job(
            "task:1",
            Box::new(move || {
                async move {
                    tx.send("done").ok();
                    Ok(())
                }
                .boxed()
            }),
        );
        assert!(accepted);
        assert_eq!(rx.await.unwrap(), "done");

        queue.stop().await;
        let stats = queue.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert!(!stats.started);
    }

    #[tokio::test]
    async fn queue_counts_failed_jobs() {
        let queue = memory_queue();
        queue.start(1, 10).await;

        assert!(queue.enqueue_job(
            "task:fail",
            Box::new(|| async { anyhow::bail!("boom") }.boxed()),
        ));
        queue.stop().await;

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let queue = memory_queue();
        queue.start(1, 1).await;

        // Park the single worker on a gated job, then fill the FIFO.
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        assert!(queue.enqueue_job(
            "task:blocker",
            Box::new(move || {
                async move {
                    gate_rx.await.ok();
                    Ok(())
                }
                .boxed()
            }),
        ));
        // Give the worker a moment to take the blocker off the FIFO.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(queue.enqueue_job("task:fills", Box::new(|| async { Ok(()) }.boxed())));
        assert!(!queue.enqueue_job("task:rejected", Box::new(|| async { Ok(()) }.boxed())));

        gate_tx.send(()).ok();
        queue.stop().await;

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.completed, 2);
        // Conservation at quiescence.
        assert_eq!(stats.enqueued, stats.completed + stats.failed + stats.queue_size as u64);
    }

    #[tokio::test]
    async fn registered_handler_runs_by_name() {
        let queue = memory_queue();
        let (tx, rx) = tokio::sync::oneshot::channel::<serde_json::Value>();
        let tx = std::sync::Mutex::new(Some(tx));
        queue.register_handler("echo", move |args| {
            if let Some(tx) = tx.lock().unwrap().take() {
                tx.send(args).ok();
            }
            async { Ok(()) }.boxed()
        });
        queue.start(1, 10).await;

        assert!(queue.enqueue("task:echo", "echo", serde_json::json!({"n": 7})).await);
        assert_eq!(rx.await.unwrap(), serde_json::json!({"n": 7}));

        // Unregistered names are rejected outright.
        assert!(!queue.enqueue("task:none", "missing", serde_json::Value::Null).await);
        queue.stop().await;
    }

    #[tokio::test]
    async fn shared_backend_falls_back_to_memory_when_kv_unreachable() {
        let queue = TaskQueue::new(
            Arc::new(kv_store::KvStore::disabled()),
            QueueConfig {
                backend: Backend::Shared,
                ..QueueConfig::default()
            },
        );
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = std::sync::Mutex::new(Some(tx));
        queue.register_handler("noop", move |_| {
            if let Some(tx) = tx.lock().unwrap().take() {
                tx.send(()).ok();
            }
            async { Ok(()) }.boxed()
        });
        queue.start(2, 10).await;

        let stats = queue.stats();
        assert_eq!(stats.backend_requested, Backend::Shared);
        assert_eq!(stats.backend, Backend::Memory);

        assert!(queue.enqueue("task:1", "noop", serde_json::Value::Null).await);
        rx.await.unwrap();
        queue.stop().await;
        assert_eq!(queue.stats().completed, 1);
    }
}
