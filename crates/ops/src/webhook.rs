use crate::alerts::{Alert, Severity};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Discord,
    Slack,
    Generic,
}

impl Provider {
    /// Infer the provider from well-known webhook URL prefixes.
    pub fn infer(url: &str) -> Provider {
        let lowered = url.to_ascii_lowercase();
        if lowered.contains("discord.com/api/webhooks")
            || lowered.contains("discordapp.com/api/webhooks")
        {
            Provider::Discord
        } else if lowered.contains("hooks.slack.com") {
            Provider::Slack
        } else {
            Provider::Generic
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// No URL disables delivery entirely.
    pub url: Option<String>,
    /// Explicit provider override; `None` infers from the URL.
    pub provider: Option<Provider>,
    pub min_severity: Severity,
    pub timeout: Duration,
    pub auth_header: Option<(String, String)>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            provider: None,
            min_severity: Severity::Warning,
            timeout: Duration::from_secs(5),
            auth_header: None,
        }
    }
}

/// Delivers alert transitions to the configured webhook. Failures are logged
/// and swallowed; delivery is never retried.
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub async fn notify(&self, event_type: &str, alert: &Alert) {
        let Some(url) = self.config.url.as_deref() else {
            return;
        };
        if alert.severity < self.config.min_severity {
            return;
        }

        let provider = self
            .config
            .provider
            .unwrap_or_else(|| Provider::infer(url));
        let body = build_body(provider, event_type, alert);

        let mut request = self.client.post(url).json(&body);
        if let Some((header, value)) = &self.config.auth_header {
            request = request.header(header.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(response) if response.status().as_u16() >= 400 => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    ?provider,
                    id = %alert.id,
                    "alert webhook delivery rejected"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, ?provider, id = %alert.id, "alert webhook delivery failed");
            }
        }
    }
}

/// The generic payload shape; discord and slack collapse to their
/// single-text-field formats.
pub fn build_payload(event_type: &str, alert: &Alert) -> serde_json::Value {
    let severity = serde_json::to_value(alert.severity)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "info".to_string());
    let text = format!(
        "[OPS_ALERT_{}] {} {}: {} (value={}, threshold={})",
        event_type.to_ascii_uppercase(),
        severity.to_ascii_uppercase(),
        alert.id,
        alert.message,
        alert.value,
        alert.threshold,
    );
    serde_json::json!({
        "event": "ops_alert",
        "event_type": event_type,
        "id": alert.id,
        "severity": severity,
        "message": alert.message,
        "value": alert.value,
        "threshold": alert.threshold,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "text": text,
    })
}

fn build_body(provider: Provider, event_type: &str, alert: &Alert) -> serde_json::Value {
    let payload = build_payload(event_type, alert);
    match provider {
        Provider::Discord => serde_json::json!({ "content": payload["text"] }),
        Provider::Slack => serde_json::json!({ "text": payload["text"] }),
        Provider::Generic => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(severity: Severity) -> Alert {
        Alert {
            id: "queue_depth_critical".to_string(),
            severity,
            message: "Task queue depth is critical".to_string(),
            value: serde_json::json!(200),
            threshold: serde_json::json!(150),
        }
    }

    #[test]
    fn provider_inference_matches_known_prefixes() {
        assert_eq!(
            Provider::infer("https://discord.com/api/webhooks/1/abc"),
            Provider::Discord
        );
        assert_eq!(
            Provider::infer("https://discordapp.com/api/webhooks/1/abc"),
            Provider::Discord
        );
        assert_eq!(
            Provider::infer("https://hooks.slack.com/services/T/B/x"),
            Provider::Slack
        );
        assert_eq!(Provider::infer("https://ops.example.com/hook"), Provider::Generic);
    }

    #[test]
    fn payload_carries_the_transition_and_alert_fields() {
        let payload = build_payload("triggered", &alert(Severity::Critical));
        assert_eq!(payload["event"], "ops_alert");
        assert_eq!(payload["event_type"], "triggered");
        assert_eq!(payload["id"], "queue_depth_critical");
        assert_eq!(payload["severity"], "critical");
        assert_eq!(payload["value"], 200);
        let text = payload["text"].as_str().unwrap();
        assert!(text.starts_with("[OPS_ALERT_TRIGGERED] CRITICAL queue_depth_critical"));
    }

    #[test]
    fn provider_bodies_collapse_to_single_text_fields() {
        let discord = build_body(Provider::Discord, "resolved", &alert(Severity::Warning));
        assert!(discord.get("content").is_some());
        assert!(discord.get("event").is_none());

        let slack = build_body(Provider::Slack, "resolved", &alert(Severity::Warning));
        assert!(slack.get("text").is_some());
        assert!(slack.get("content").is_none());
    }

    #[test]
    fn severity_ordering_backs_the_minimum_gate() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }
}
