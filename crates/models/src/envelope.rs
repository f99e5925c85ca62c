use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// ApiEnvelope is the `{status, message, data, requestId}` shape wrapping
/// every JSON response under the API prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub status: ResponseStatus,
    pub message: String,
    pub data: Option<serde_json::Value>,
    #[serde(
        rename = "requestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
}

impl ApiEnvelope {
    pub fn success(
        data: impl Serialize,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: normalize_data(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            request_id,
        }
    }

    pub fn error(
        message: impl Into<String>,
        data: Option<serde_json::Value>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            data: data.and_then(normalize_data),
            request_id,
        }
    }
}

/// Shape arbitrary payloads into the envelope's object-or-null `data` slot:
/// objects pass through, lists become `{items}`, scalars become `{value}`.
pub fn normalize_data(payload: serde_json::Value) -> Option<serde_json::Value> {
    match payload {
        serde_json::Value::Null => None,
        value @ serde_json::Value::Object(_) => Some(value),
        value @ serde_json::Value::Array(_) => Some(serde_json::json!({ "items": value })),
        value => Some(serde_json::json!({ "value": value })),
    }
}

/// True when a decoded body already matches the envelope contract.
pub fn is_envelope_value(payload: &serde_json::Value) -> bool {
    let Some(map) = payload.as_object() else {
        return false;
    };
    ["status", "message", "data"]
        .iter()
        .all(|key| map.contains_key(*key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_non_objects() {
        assert_eq!(normalize_data(serde_json::Value::Null), None);
        assert_eq!(
            normalize_data(serde_json::json!([1, 2])),
            Some(serde_json::json!({"items": [1, 2]}))
        );
        assert_eq!(
            normalize_data(serde_json::json!("hi")),
            Some(serde_json::json!({"value": "hi"}))
        );
        assert_eq!(
            normalize_data(serde_json::json!({"x": 1})),
            Some(serde_json::json!({"x": 1}))
        );
    }

    #[test]
    fn envelope_detection_requires_all_three_keys() {
        assert!(is_envelope_value(&serde_json::json!({
            "status": "success", "message": "hi", "data": {"x": 1}
        })));
        assert!(!is_envelope_value(&serde_json::json!({
            "status": "success", "message": "hi"
        })));
        assert!(!is_envelope_value(&serde_json::json!([1])));
    }

    #[test]
    fn request_id_serializes_camel_case() {
        let envelope = ApiEnvelope::success(
            serde_json::json!({"x": 1}),
            "OK",
            Some("rid-1".to_string()),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["requestId"], "rid-1");
        assert_eq!(value["status"], "success");
    }
}
