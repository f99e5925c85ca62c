//! `ApiError` wraps an `anyhow::Error` with an HTTP status and renders the
//! response envelope, so handlers can return `Result<Json<T>, ApiError>` and
//! use `?` freely. `From` impls supply reasonable default status codes; use
//! `ApiErrorExt::with_status` when a specific status is needed.

use axum::http::StatusCode;
use models::ApiEnvelope;

pub trait ApiErrorExt {
    /// Sets the http response status to use when responding with this error.
    fn with_status(self, status: StatusCode) -> ApiError;
}

impl<E: Into<ApiError> + Sized> ApiErrorExt for E {
    fn with_status(self, status: StatusCode) -> ApiError {
        let mut err: ApiError = self.into();
        err.status = status;
        err
    }
}

#[derive(Debug, thiserror::Error)]
#[error("status: {status}, error: {error}")]
pub struct ApiError {
    pub status: StatusCode,
    #[source]
    pub error: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> ApiError {
        ApiError { status, error }
    }

    pub fn not_found(what: &str) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, anyhow::anyhow!("{what} not found"))
    }

    pub fn forbidden() -> ApiError {
        ApiError::new(StatusCode::FORBIDDEN, anyhow::anyhow!("Forbidden"))
    }

    pub fn unauthorized(reason: &str) -> ApiError {
        ApiError::new(StatusCode::UNAUTHORIZED, anyhow::anyhow!("{reason}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = if let Some(api_error) = error.downcast_ref::<ApiError>() {
            api_error.status
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError { status, error }
    }
}

impl From<forex_data::Error> for ApiError {
    fn from(error: forex_data::Error) -> Self {
        match &error {
            forex_data::Error::UnavailablePair(_) => {
                ApiError::new(StatusCode::NOT_FOUND, anyhow::Error::from(error))
            }
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            tracing::error!(error = ?self.error, "API responding with internal error");
        }
        let message = if self.status.is_server_error() {
            "Internal server error".to_string()
        } else {
            format!("{:#}", self.error)
        };
        let envelope = ApiEnvelope::error(message, None, None);
        (self.status, axum::Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn client_errors_surface_their_message() {
        let error = ApiError::not_found("Task");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Task not found");
    }

    #[tokio::test]
    async fn server_errors_are_masked() {
        let error: ApiError = anyhow::anyhow!("connection pool exhausted").into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);

        let response = error.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Internal server error");
    }

    #[test]
    fn with_status_overrides_the_default() {
        let error = anyhow::anyhow!("queue is not accepting work")
            .with_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
