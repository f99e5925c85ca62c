use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// UpdateType classifies an event frame for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Info,
    Success,
    Warning,
    Error,
    Progress,
    Ping,
}

/// EventFrame is the JSON frame written to duplex sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub id: uuid::Uuid,
    pub task_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl EventFrame {
    pub fn new(task_id: impl Into<String>, message: impl Into<String>, kind: UpdateType) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            task_id: task_id.into(),
            message: message.into(),
            update_type: kind,
            timestamp: Utc::now(),
            progress: None,
            data: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// A server-initiated heartbeat frame for the session's topic.
    pub fn ping(topic: impl Into<String>) -> Self {
        Self::new(topic, "ping", UpdateType::Ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_serializes_type_field_and_omits_empty_optionals() {
        let frame = EventFrame::new("task-1", "hello", UpdateType::Info);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "info");
        assert_eq!(value["task_id"], "task-1");
        assert!(value.get("progress").is_none());
        assert!(value.get("data").is_none());

        let frame = frame.with_progress(0.4).with_data(serde_json::json!({"step": "x"}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["progress"], 0.4);
        assert_eq!(value["data"]["step"], "x");
    }
}
