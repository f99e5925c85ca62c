//! The request front door. Middleware are applied so a request traverses:
//! correlation id → envelope wrap → security headers → payload size limit →
//! auth rate limit → global rate limit → token verification → CORS, and the
//! response walks back out in reverse. The order is semantically significant:
//! short-circuit responses from inner layers still receive security headers
//! and the correlation id on the way out.

mod auth;
mod correlation;
mod envelope;
mod limits;
mod security;

pub use auth::verify_token;
pub use correlation::correlation_id;
pub use envelope::wrap_envelope;
pub use limits::{
    auth_rate_limit, global_rate_limit, payload_size_limit, RateLimiter, SlidingWindow,
};
pub use security::security_headers;

use axum::http::StatusCode;
use models::ApiEnvelope;

/// Correlation id attached to the request by the outermost layer.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Paths exempt from the global rate limit.
pub(crate) const RATE_LIMIT_EXEMPT: &[&str] =
    &["/", "/health", "/healthz", "/api/health", "/openapi.json", "/redoc"];

/// Auth-scoped rate limiting covers the credential-sensitive endpoints.
pub(crate) const AUTH_RATE_LIMITED_PATHS: &[&str] = &[
    "/auth/password-reset",
    "/auth/email-verification",
    "/auth/login",
    "/auth/signup",
];

pub(crate) fn client_ip(req: &axum::extract::Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn request_id_of(req: &axum::extract::Request) -> Option<String> {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .or_else(|| {
            req.headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}

/// An envelope-shaped short-circuit response.
pub(crate) fn reject(
    status: StatusCode,
    message: &str,
    request_id: Option<String>,
) -> axum::response::Response {
    let envelope = ApiEnvelope::error(message, None, request_id);
    (status, axum::Json(envelope)).into_response()
}

use axum::response::IntoResponse;
