use crate::alerts::{Alert, Severity};
use crate::OpsSnapshot;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Render the ops snapshot and active alerts as Prometheus text. Values are
/// set from the snapshot at scrape time, so a fresh registry is built per
/// call rather than mutating process-global collectors.
pub fn render_prometheus(snapshot: &OpsSnapshot, alerts: &[Alert]) -> String {
    let registry = Registry::new();

    let gauges: &[(&str, &str, i64)] = &[
        (
            "copilot_backend_queue_started",
            "Queue service started (1=true,0=false)",
            snapshot.queue.started as i64,
        ),
        (
            "copilot_backend_queue_size",
            "Current task queue size",
            snapshot.queue.queue_size as i64,
        ),
        (
            "copilot_backend_queue_enqueued_total",
            "Total enqueued tasks",
            snapshot.queue.enqueued as i64,
        ),
        (
            "copilot_backend_queue_completed_total",
            "Total completed queued tasks",
            snapshot.queue.completed as i64,
        ),
        (
            "copilot_backend_queue_failed_total",
            "Total failed queued tasks",
            snapshot.queue.failed as i64,
        ),
        (
            "copilot_backend_websocket_connections_total",
            "Total active websocket connections",
            snapshot.websocket.total_connections as i64,
        ),
        (
            "copilot_backend_websocket_registry_size",
            "Total tracked websocket connections in registry",
            snapshot.websocket.registry_size as i64,
        ),
        (
            "copilot_backend_websocket_stale_connections",
            "Total stale websocket connections",
            snapshot.websocket.stale_connections as i64,
        ),
        (
            "copilot_backend_forex_rate_failure_streak",
            "Consecutive forex rate source failures",
            snapshot.forex.rate_failure_streak as i64,
        ),
    ];
    for (name, help, value) in gauges {
        if let Ok(gauge) = IntGauge::new(*name, *help) {
            gauge.set(*value);
            let _ = registry.register(Box::new(gauge));
        }
    }

    if let Ok(backoff) = prometheus::Gauge::new(
        "copilot_backend_forex_retry_backoff_seconds",
        "Current forex retry backoff seconds",
    ) {
        backoff.set(snapshot.forex.next_rates_retry_in_seconds);
        let _ = registry.register(Box::new(backoff));
    }

    if let Ok(alerts_total) = IntGaugeVec::new(
        Opts::new(
            "copilot_backend_alerts_total",
            "Active ops alerts grouped by severity",
        ),
        &["severity"],
    ) {
        for severity in ["critical", "warning", "info"] {
            let count = alerts
                .iter()
                .filter(|alert| severity_label(alert.severity) == severity)
                .count() as i64;
            alerts_total.with_label_values(&[severity]).set(count);
        }
        let _ = registry.register(Box::new(alerts_total));
    }

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(error) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::warn!(%error, "failed to encode prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertThresholds, WsStats};
    use std::collections::HashMap;

    #[test]
    fn rendered_text_carries_gauges_and_severity_labels() {
        let snapshot = OpsSnapshot {
            queue: task_queue::QueueStats {
                started: true,
                backend_requested: task_queue::Backend::Memory,
                backend: task_queue::Backend::Memory,
                workers: 2,
                max_size: 200,
                queue_size: 200,
                enqueued: 7,
                completed: 5,
                failed: 2,
                registered_handlers: Vec::new(),
                queue_key: None,
            },
            websocket: WsStats {
                total_connections: 3,
                tasks: Vec::new(),
                registry_size: 3,
                registry: HashMap::new(),
                stale_after_seconds: 120,
                stale_connections: 0,
                forex_stream_running: true,
                forex_stream_interval_seconds: 10,
            },
            forex: forex_data::RuntimeStats {
                cached_pairs: 8,
                tracked_histories: 8,
                rate_failure_streak: 0,
                next_rates_retry_in_seconds: 0.0,
                min_fetch_interval_seconds: 3,
            },
        };
        let alerts = crate::evaluate(&snapshot, &AlertThresholds::default());
        let text = render_prometheus(&snapshot, &alerts);

        assert!(text.contains("copilot_backend_queue_started 1"));
        assert!(text.contains("copilot_backend_queue_size 200"));
        assert!(text.contains("copilot_backend_queue_enqueued_total 7"));
        assert!(text.contains("copilot_backend_websocket_connections_total 3"));
        assert!(text.contains(r#"copilot_backend_alerts_total{severity="critical"} 1"#));
        assert!(text.contains(r#"copilot_backend_alerts_total{severity="warning"} 1"#));
        assert!(text.contains(r#"copilot_backend_alerts_total{severity="info"} 0"#));
    }
}
