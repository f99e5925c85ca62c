//! Request-level observability backing the monitoring surface: latency
//! percentiles, per-endpoint statistics, and dependency health checks.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Retained latency samples; the oldest are dropped past this point.
const LATENCY_WINDOW: usize = 10_000;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EndpointStats {
    pub total_requests: u64,
    pub total_latency_ms: f64,
    pub error_count: u64,
    pub last_called: Option<DateTime<Utc>>,
    pub p95_latency_ms: f64,
}

#[derive(Default)]
struct MetricsInner {
    latencies: Vec<f64>,
    success_count: u64,
    error_count: u64,
    endpoints: HashMap<String, EndpointStats>,
}

#[derive(Default)]
pub struct RequestMetrics {
    inner: Mutex<MetricsInner>,
}

impl RequestMetrics {
    pub fn record(&self, endpoint: &str, latency_ms: f64, status: u16) {
        let mut inner = self.inner.lock().unwrap();
        inner.latencies.push(latency_ms);
        if inner.latencies.len() > LATENCY_WINDOW {
            let excess = inner.latencies.len() - LATENCY_WINDOW;
            inner.latencies.drain(..excess);
        }
        if status < 400 {
            inner.success_count += 1;
        } else {
            inner.error_count += 1;
        }

        let p95 = percentile(&inner.latencies, 0.95);
        let stats = inner.endpoints.entry(endpoint.to_string()).or_default();
        stats.total_requests += 1;
        stats.total_latency_ms += latency_ms;
        if status >= 400 {
            stats.error_count += 1;
        }
        stats.last_called = Some(Utc::now());
        if stats.total_requests >= 20 {
            stats.p95_latency_ms = p95;
        }
    }

    pub fn summary(&self) -> serde_json::Value {
        let inner = self.inner.lock().unwrap();
        let latencies = &inner.latencies;
        let total = latencies.len() as u64;
        let error_rate = if total > 0 {
            inner.error_count as f64 / total as f64
        } else {
            0.0
        };

        serde_json::json!({
            "total_requests": total,
            "success_count": inner.success_count,
            "error_count": inner.error_count,
            "error_rate": error_rate,
            "request_latency_ms": {
                "min": if total > 0 {
                    latencies.iter().copied().fold(f64::INFINITY, f64::min)
                } else {
                    0.0
                },
                "max": latencies.iter().copied().fold(0.0, f64::max),
                "avg": if total > 0 { latencies.iter().sum::<f64>() / total as f64 } else { 0.0 },
                "p50": percentile(latencies, 0.50),
                "p95": percentile(latencies, 0.95),
                "p99": percentile(latencies, 0.99),
            },
            "endpoints": inner.endpoints,
        })
    }
}

fn percentile(samples: &[f64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Record latency and status for every request, keyed "METHOD /path".
pub async fn track_requests(
    State(app): State<Arc<crate::App>>,
    req: Request,
    next: Next,
) -> Response {
    let endpoint = format!("{} {}", req.method(), req.uri().path());
    let started = Instant::now();
    let response = next.run(req).await;
    app.metrics.record(
        &endpoint,
        started.elapsed().as_secs_f64() * 1000.0,
        response.status().as_u16(),
    );
    response
}

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckResult {
    pub healthy: bool,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Named dependency health checks, run on demand by the monitoring routes.
#[derive(Default)]
pub struct HealthChecker {
    checks: Mutex<Vec<(String, CheckFn)>>,
    last: Mutex<HashMap<String, CheckResult>>,
}

impl HealthChecker {
    pub fn register<F>(&self, name: &str, check: F)
    where
        F: Fn() -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        self.checks
            .lock()
            .unwrap()
            .push((name.to_string(), Arc::new(check)));
    }

    pub async fn run_all(&self) -> HashMap<String, CheckResult> {
        let checks: Vec<(String, CheckFn)> = self.checks.lock().unwrap().clone();
        let mut results = HashMap::new();
        for (name, check) in checks {
            let started = Instant::now();
            let healthy = check().await;
            let result = CheckResult {
                healthy,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                timestamp: Utc::now(),
            };
            results.insert(name, result);
        }
        *self.last.lock().unwrap() = results.clone();
        results
    }

    /// Ready when every registered check passed its most recent run. Checks
    /// that have never run do not block readiness.
    pub fn is_ready(&self) -> bool {
        self.last
            .lock()
            .unwrap()
            .values()
            .all(|result| result.healthy)
    }
}
