use crate::OpsSnapshot;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub value: serde_json::Value,
    pub threshold: serde_json::Value,
}

impl Alert {
    fn new(
        id: &str,
        severity: Severity,
        message: &str,
        value: impl Into<serde_json::Value>,
        threshold: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.to_string(),
            severity,
            message: message.to_string(),
            value: value.into(),
            threshold: threshold.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub queue_depth_warn: usize,
    pub queue_depth_crit: usize,
    pub queue_failed_warn: u64,
    /// Sessions idle at least this long count as stale.
    pub ws_stale_after: Duration,
    pub ws_stale_count_warn: usize,
    pub forex_failure_streak_warn: u32,
    pub forex_retry_warn_seconds: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            queue_depth_warn: 80,
            queue_depth_crit: 150,
            queue_failed_warn: 1,
            ws_stale_after: Duration::from_secs(120),
            ws_stale_count_warn: 1,
            forex_failure_streak_warn: 3,
            forex_retry_warn_seconds: 20.0,
        }
    }
}

/// Threshold evaluation over one snapshot. Queue depth emits at most one of
/// its warning/critical pair.
pub fn evaluate(snapshot: &OpsSnapshot, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let queue_size = snapshot.queue.queue_size;
    if queue_size >= thresholds.queue_depth_crit {
        alerts.push(Alert::new(
            "queue_depth_critical",
            Severity::Critical,
            "Task queue depth is critical",
            queue_size,
            thresholds.queue_depth_crit,
        ));
    } else if queue_size >= thresholds.queue_depth_warn {
        alerts.push(Alert::new(
            "queue_depth_warning",
            Severity::Warning,
            "Task queue depth is high",
            queue_size,
            thresholds.queue_depth_warn,
        ));
    }

    if snapshot.queue.failed >= thresholds.queue_failed_warn {
        alerts.push(Alert::new(
            "queue_failed_tasks",
            Severity::Warning,
            "Queue has failed tasks",
            snapshot.queue.failed,
            thresholds.queue_failed_warn,
        ));
    }

    if snapshot.websocket.stale_connections >= thresholds.ws_stale_count_warn {
        alerts.push(Alert::new(
            "websocket_stale_connections",
            Severity::Warning,
            "Stale websocket connections detected",
            snapshot.websocket.stale_connections,
            thresholds.ws_stale_count_warn,
        ));
    }

    if snapshot.forex.rate_failure_streak >= thresholds.forex_failure_streak_warn {
        alerts.push(Alert::new(
            "forex_rate_failure_streak",
            Severity::Warning,
            "Forex rate source failure streak elevated",
            snapshot.forex.rate_failure_streak,
            thresholds.forex_failure_streak_warn,
        ));
    }

    let retry_in = snapshot.forex.next_rates_retry_in_seconds;
    if retry_in >= thresholds.forex_retry_warn_seconds {
        alerts.push(Alert::new(
            "forex_retry_backoff_high",
            Severity::Warning,
            "Forex retry backoff is high",
            (retry_in * 1000.0).round() / 1000.0,
            thresholds.forex_retry_warn_seconds,
        ));
    }

    alerts
}

/// Sessions whose `last_seen` is at least `stale_after` in the past.
pub fn count_stale(
    registry: &HashMap<String, serde_json::Value>,
    stale_after: Duration,
) -> usize {
    let now = chrono::Utc::now();
    registry
        .values()
        .filter(|entry| {
            let Some(last_seen) = entry
                .get("last_seen")
                .and_then(|v| v.as_str())
                .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
            else {
                return false;
            };
            let age = now.signed_duration_since(last_seen.with_timezone(&chrono::Utc));
            age.to_std().map_or(false, |age| age >= stale_after)
        })
        .count()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Triggered(Alert),
    Resolved(Alert),
}

/// Remembers which alert ids are currently firing. `apply` diffs a fresh
/// evaluation against that memory: unseen ids fire, vanished ids resolve
/// (carrying their last-known contents).
#[derive(Default)]
pub struct AlertLatch {
    active: Mutex<HashMap<String, Alert>>,
}

impl AlertLatch {
    pub fn apply(&self, alerts: &[Alert]) -> Vec<Transition> {
        let mut active = self.active.lock().unwrap();
        let mut transitions = Vec::new();

        for alert in alerts {
            if !active.contains_key(&alert.id) {
                transitions.push(Transition::Triggered(alert.clone()));
            }
            active.insert(alert.id.clone(), alert.clone());
        }

        let current_ids: Vec<String> = alerts.iter().map(|a| a.id.clone()).collect();
        let resolved: Vec<String> = active
            .keys()
            .filter(|id| !current_ids.contains(id))
            .cloned()
            .collect();
        for id in resolved {
            if let Some(previous) = active.remove(&id) {
                transitions.push(Transition::Resolved(previous));
            }
        }

        transitions
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}
