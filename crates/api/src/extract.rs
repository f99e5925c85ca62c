use axum::http::StatusCode;
use models::ApiEnvelope;

/// Request wraps a JSON-deserialized request type T which also implements
/// the validator::Validate trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Request<T>(pub T);

/// Rejection is an error type of reasons why an API request may fail
/// deserialization or validation.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    JsonError(#[from] axum::extract::rejection::JsonRejection),
}

#[async_trait::async_trait]
impl<T, S> axum::extract::FromRequest<S> for Request<T>
where
    T: serde::de::DeserializeOwned + validator::Validate,
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let axum::extract::Json(value) = axum::extract::Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Request(value))
    }
}

impl axum::response::IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        let (status, data) = match &self {
            Rejection::ValidationError(inner) => {
                let errors = serde_json::to_value(inner).unwrap_or_default();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Some(serde_json::json!({ "errors": errors })),
                )
            }
            Rejection::JsonError(inner) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Some(serde_json::json!({ "detail": inner.to_string() })),
            ),
        };
        let envelope = ApiEnvelope::error("Validation error", data, None);
        (status, axum::Json(envelope)).into_response()
    }
}

/// Verified token claims injected by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub claims: serde_json::Value,
}

#[async_trait::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for AuthContext {
    type Rejection = crate::error::ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| crate::error::ApiError::unauthorized("Unauthorized"))
    }
}
