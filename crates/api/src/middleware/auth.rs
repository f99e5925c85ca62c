use super::{reject, request_id_of};
use crate::extract::AuthContext;
use crate::App;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Paths under the API prefix that stay reachable without a bearer token:
/// the unauthenticated health probe and the duplex upgrade endpoints, whose
/// clients cannot attach an Authorization header from a browser.
const PUBLIC_API_PATHS: &[&str] = &["/api/health"];

fn is_public(path: &str) -> bool {
    PUBLIC_API_PATHS.contains(&path) || path.starts_with("/api/ws")
}

/// Fail-closed token verification for protected API paths. Decoding runs on
/// a blocking thread; verified claims are injected into request extensions.
pub async fn verify_token(State(app): State<Arc<App>>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api") || *req.method() == Method::OPTIONS || is_public(&path) {
        return next.run(req).await;
    }

    let Some(secret) = app.config.auth_jwt_secret.clone() else {
        // Development without a configured verifier; production startup
        // refuses this configuration outright.
        req.extensions_mut().insert(AuthContext {
            user_id: "local-dev".to_string(),
            claims: serde_json::json!({ "sub": "local-dev" }),
        });
        return next.run(req).await;
    };

    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let Some(token) = token else {
        return unauthorized(&app, "Missing bearer token", &req);
    };

    let decoded = tokio::task::spawn_blocking(move || {
        let key = jsonwebtoken::DecodingKey::from_secret(secret.as_bytes());
        let validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        jsonwebtoken::decode::<serde_json::Value>(&token, &key, &validation)
    })
    .await;

    let claims = match decoded {
        Ok(Ok(data)) => data.claims,
        Ok(Err(error)) => {
            return unauthorized(&app, &format!("Invalid token: {error}"), &req);
        }
        Err(error) => {
            tracing::error!(%error, "token verification task failed");
            return reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                request_id_of(&req),
            );
        }
    };

    let Some(user_id) = claims.get("sub").and_then(|sub| sub.as_str()) else {
        return unauthorized(&app, "Token is missing a subject", &req);
    };

    req.extensions_mut().insert(AuthContext {
        user_id: user_id.to_string(),
        claims,
    });
    next.run(req).await
}

fn unauthorized(app: &App, reason: &str, req: &Request) -> Response {
    // Never leak verification detail to unauthenticated callers in
    // production; debug mode may surface it.
    let message = if app.config.debug { reason } else { "Unauthorized" };
    reject(StatusCode::UNAUTHORIZED, message, request_id_of(req))
}
