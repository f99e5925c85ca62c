use super::{client_ip, reject, request_id_of, AUTH_RATE_LIMITED_PATHS, RATE_LIMIT_EXEMPT};
use crate::App;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The limiter contract is deliberately narrow so a KV-backed implementation
/// can substitute for horizontal scaling without touching callers.
pub trait RateLimiter: Send + Sync {
    fn allow(&self, key: &str) -> bool;
}

/// Process-local sliding window: at most `max` requests per key per window.
pub struct SlidingWindow {
    max: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindow {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max: max.max(1),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for SlidingWindow {
    fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key.to_string()).or_default();
        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }
        if bucket.len() >= self.max {
            return false;
        }
        bucket.push_back(now);
        true
    }
}

/// Reject oversized POST/PUT/PATCH bodies under the API prefix before they
/// are read. A payload of exactly the limit is accepted.
pub async fn payload_size_limit(
    State(app): State<Arc<App>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method();
    let applies = (method == Method::POST || method == Method::PUT || method == Method::PATCH)
        && req.uri().path().starts_with("/api");
    if applies {
        if let Some(raw) = req.headers().get(axum::http::header::CONTENT_LENGTH) {
            let parsed = raw.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok());
            match parsed {
                Some(length) if length > app.config.max_request_body_bytes => {
                    return reject(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "Request payload too large",
                        request_id_of(&req),
                    );
                }
                Some(_) => {}
                None => {
                    return reject(
                        StatusCode::BAD_REQUEST,
                        "Invalid Content-Length header",
                        request_id_of(&req),
                    );
                }
            }
        }
    }
    next.run(req).await
}

/// Tighter sliding window per (client, path) over the auth endpoints.
pub async fn auth_rate_limit(State(app): State<Arc<App>>, req: Request, next: Next) -> Response {
    if !app.config.auth_rate_limit_enabled || *req.method() == Method::OPTIONS {
        return next.run(req).await;
    }
    let path = req.uri().path();
    if !AUTH_RATE_LIMITED_PATHS.contains(&path) {
        return next.run(req).await;
    }

    let key = format!("{}:{}", client_ip(&req), path);
    if !app.auth_limiter.allow(&key) {
        let mut response = reject(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many auth requests. Please wait and retry.",
            request_id_of(&req),
        );
        let retry_after = app.config.auth_rate_limit_window.as_secs().to_string();
        if let Ok(value) = HeaderValue::from_str(&retry_after) {
            response.headers_mut().insert("retry-after", value);
        }
        return response;
    }
    next.run(req).await
}

/// Per-client sliding window over everything except health and docs paths.
pub async fn global_rate_limit(
    State(app): State<Arc<App>>,
    req: Request,
    next: Next,
) -> Response {
    if !app.config.rate_limit_enabled {
        return next.run(req).await;
    }
    let path = req.uri().path();
    if RATE_LIMIT_EXEMPT.contains(&path) || path.starts_with("/docs") {
        return next.run(req).await;
    }

    let key = client_ip(&req);
    if !app.limiter.allow(&key) {
        return reject(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
            request_id_of(&req),
        );
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_max_then_rejects() {
        let limiter = SlidingWindow::new(3, Duration::from_secs(60));
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
        // Other clients are unaffected.
        assert!(limiter.allow("5.6.7.8"));
    }

    #[test]
    fn window_slides_as_entries_expire() {
        let limiter = SlidingWindow::new(2, Duration::from_millis(50));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.allow("k"));
    }
}
