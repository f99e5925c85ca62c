//! Operational sampling, threshold alerting, and metrics rendering.
//!
//! A snapshot composes queue, websocket, and forex runtime state; evaluation
//! produces threshold alerts; the latch diffs active alert ids across polls
//! and turns edges into `triggered` / `resolved` webhook notifications.

mod alerts;
mod metrics;
mod webhook;

pub use alerts::{count_stale, evaluate, Alert, AlertLatch, AlertThresholds, Severity, Transition};
pub use metrics::render_prometheus;
pub use webhook::{Provider, WebhookConfig, WebhookNotifier};

use std::collections::HashMap;

/// Websocket-side runtime sample.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WsStats {
    pub total_connections: usize,
    pub tasks: Vec<String>,
    pub registry_size: usize,
    pub registry: HashMap<String, serde_json::Value>,
    pub stale_after_seconds: u64,
    pub stale_connections: usize,
    pub forex_stream_running: bool,
    pub forex_stream_interval_seconds: u64,
}

/// Point-in-time sample of the subsystems the ops surface watches.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpsSnapshot {
    pub queue: task_queue::QueueStats,
    pub websocket: WsStats,
    pub forex: forex_data::RuntimeStats,
}

/// Latched alert evaluation plus webhook delivery for the edges.
pub struct OpsService {
    pub thresholds: AlertThresholds,
    latch: AlertLatch,
    notifier: WebhookNotifier,
}

impl OpsService {
    pub fn new(thresholds: AlertThresholds, webhook: WebhookConfig) -> Self {
        Self {
            thresholds,
            latch: AlertLatch::default(),
            notifier: WebhookNotifier::new(webhook),
        }
    }

    /// Evaluate a snapshot, update the latch, and emit webhook notifications
    /// for every state transition. Returns the currently-active alerts.
    pub async fn evaluate_and_notify(&self, snapshot: &OpsSnapshot) -> Vec<Alert> {
        let alerts = evaluate(snapshot, &self.thresholds);
        for transition in self.latch.apply(&alerts) {
            match transition {
                Transition::Triggered(alert) => {
                    tracing::warn!(
                        id = %alert.id,
                        severity = ?alert.severity,
                        value = %alert.value,
                        threshold = %alert.threshold,
                        "ops alert triggered"
                    );
                    self.notifier.notify("triggered", &alert).await;
                }
                Transition::Resolved(alert) => {
                    tracing::info!(id = %alert.id, "ops alert resolved");
                    self.notifier.notify("resolved", &alert).await;
                }
            }
        }
        alerts
    }
}
