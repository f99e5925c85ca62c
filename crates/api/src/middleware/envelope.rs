use super::RequestId;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, Method};
use axum::middleware::Next;
use axum::response::Response;
use models::{is_envelope_value, ApiEnvelope};

/// Normalize successful JSON responses under the API prefix into the
/// `{status, message, data, requestId}` envelope. Bodies that already match
/// the envelope shape pass through with only the requestId filled in, which
/// makes the wrap idempotent.
pub async fn wrap_envelope(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let request_id = req.extensions().get::<RequestId>().map(|id| id.0.clone());

    let response = next.run(req).await;

    if !path.starts_with("/api")
        || path.starts_with("/api/ws")
        || method == Method::OPTIONS
        || response.status().as_u16() >= 400
    {
        return response;
    }
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(%error, %path, "failed to buffer response body for envelope");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let Ok(decoded) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    let payload = if is_envelope_value(&decoded) {
        let mut payload = decoded;
        if let (Some(map), Some(request_id)) = (payload.as_object_mut(), request_id.as_ref()) {
            map.entry("requestId")
                .or_insert_with(|| serde_json::Value::String(request_id.clone()));
        }
        payload
    } else {
        let message = decoded
            .get("message")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("OK")
            .to_string();
        serde_json::to_value(ApiEnvelope::success(decoded, message, request_id))
            .unwrap_or_default()
    };

    let encoded = serde_json::to_vec(&payload).unwrap_or_default();
    // Content-Length is stale after the rewrite; the new body sets its own.
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn test_router() -> Router {
        Router::new()
            .route(
                "/api/plain",
                get(|| async { axum::Json(serde_json::json!({"x": 1})) }),
            )
            .route(
                "/api/with-message",
                get(|| async {
                    axum::Json(serde_json::json!({"message": "created", "id": 7}))
                }),
            )
            .route(
                "/api/pre-wrapped",
                get(|| async {
                    axum::Json(serde_json::json!({
                        "status": "success", "message": "hi", "data": {"x": 1}
                    }))
                }),
            )
            .route("/api/text", get(|| async { "plain text" }))
            .route(
                "/outside",
                get(|| async { axum::Json(serde_json::json!({"x": 1})) }),
            )
            .layer(axum::middleware::from_fn(super::super::correlation_id))
            .layer(axum::middleware::from_fn(wrap_envelope))
    }

    async fn get_json(router: Router, path: &str) -> serde_json::Value {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(path)
                    .header("x-request-id", "rid-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn plain_bodies_are_wrapped() {
        let body = get_json(test_router(), "/api/plain").await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "OK");
        assert_eq!(body["data"]["x"], 1);
        assert_eq!(body["requestId"], "rid-1");
    }

    #[tokio::test]
    async fn body_message_fields_become_the_envelope_message() {
        let body = get_json(test_router(), "/api/with-message").await;
        assert_eq!(body["message"], "created");
        assert_eq!(body["data"]["id"], 7);
    }

    #[tokio::test]
    async fn wrapping_is_idempotent_modulo_request_id() {
        let body = get_json(test_router(), "/api/pre-wrapped").await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "hi");
        assert_eq!(body["data"], serde_json::json!({"x": 1}));
        assert_eq!(body["requestId"], "rid-1");
        // No double-nesting.
        assert!(body["data"].get("status").is_none());
    }

    #[tokio::test]
    async fn non_json_and_non_api_responses_pass_through() {
        let router = test_router();
        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/text")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"plain text");

        let body = get_json(router, "/outside").await;
        assert_eq!(body, serde_json::json!({"x": 1}));
    }
}
