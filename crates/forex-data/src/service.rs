use crate::forecast;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Price history is bounded per pair; the oldest samples are trimmed.
const HISTORY_CAP: usize = 240;

/// The pairs published from a USD-quoted upstream table.
const PUBLISHED_PAIRS: &[&str] = &[
    "EUR/USD", "GBP/USD", "USD/JPY", "USD/CHF", "AUD/USD", "USD/CAD", "NZD/USD", "USD/PKR",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pair {0} is not available for forecasting")]
    UnavailablePair(String),
}

/// Upstream provider of a USD-quoted rate table. The HTTP provider is an
/// implementation detail; tests substitute a stub.
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_usd_table(&self) -> anyhow::Result<HashMap<String, f64>>;
}

/// Live JSON source of USD-quoted rates.
pub struct HttpRateSource {
    client: reqwest::Client,
    url: String,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(12))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_usd_table(&self) -> anyhow::Result<HashMap<String, f64>> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            anyhow::bail!("HTTP {status} from rate source");
        }
        let body: serde_json::Value = response.json().await?;
        let rates = body
            .get("rates")
            .and_then(|r| r.as_object())
            .ok_or_else(|| anyhow::anyhow!("rate source response is missing 'rates'"))?;

        Ok(rates
            .iter()
            .filter_map(|(code, value)| {
                let value = value.as_f64()?;
                (value > 0.0).then(|| (code.to_ascii_uppercase(), value))
            })
            .collect())
    }
}

/// Market sentiment as produced by an opaque analysis oracle. Trend and risk
/// are free-form text; consumers match on substrings ("bull", "high", ...).
#[derive(Debug, Clone, serde::Serialize)]
pub struct MarketSentiment {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub trend: String,
    pub volatility: String,
    pub risk_level: String,
    pub major_pairs: HashMap<String, f64>,
}

/// Seam for the market-analysis oracle. A vendor LLM client would implement
/// this; the shipped implementation is deterministic.
#[async_trait::async_trait]
pub trait SentimentOracle: Send + Sync {
    async fn analyze(
        &self,
        rates: &HashMap<String, f64>,
        news: &[serde_json::Value],
    ) -> MarketSentiment;
}

/// Fallback sentiment used when no external oracle is wired in.
pub struct RuleBasedOracle;

#[async_trait::async_trait]
impl SentimentOracle for RuleBasedOracle {
    async fn analyze(
        &self,
        rates: &HashMap<String, f64>,
        _news: &[serde_json::Value],
    ) -> MarketSentiment {
        MarketSentiment {
            timestamp: chrono::Utc::now(),
            trend: "bullish".to_string(),
            volatility: "medium".to_string(),
            risk_level: "moderate".to_string(),
            major_pairs: rates.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForexConfig {
    pub source_url: String,
    pub min_fetch_interval: Duration,
    pub news_ttl: Duration,
    pub sentiment_ttl: Duration,
    pub forecast_ttl: Duration,
}

impl Default for ForexConfig {
    fn default() -> Self {
        Self {
            source_url: "https://api.exchangerate-api.com/v4/latest/USD".to_string(),
            min_fetch_interval: Duration::from_secs(3),
            news_ttl: Duration::from_secs(120),
            sentiment_ttl: Duration::from_secs(60),
            forecast_ttl: Duration::from_secs(30),
        }
    }
}

/// Serialized into ops snapshots and the forex diagnostics endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeStats {
    pub cached_pairs: usize,
    pub tracked_histories: usize,
    pub rate_failure_streak: u32,
    pub next_rates_retry_in_seconds: f64,
    pub min_fetch_interval_seconds: u64,
}

#[derive(Default)]
struct State {
    latest_rates: HashMap<String, f64>,
    latest_usd_base: HashMap<String, f64>,
    history: HashMap<String, Vec<f64>>,
    last_fetch: Option<Instant>,
    failure_streak: u32,
    next_retry: Option<Instant>,
    last_error_log: Option<Instant>,
    last_error_text: String,
    news_cache: Option<(Instant, Vec<serde_json::Value>)>,
    sentiment_cache: Option<(Instant, MarketSentiment)>,
    forecast_cache: HashMap<(String, models::ForecastHorizon), (Instant, models::ForecastResult)>,
}

pub struct ForexDataService {
    config: ForexConfig,
    source: Arc<dyn RateSource>,
    oracle: Arc<dyn SentimentOracle>,
    state: tokio::sync::Mutex<State>,
}

impl ForexDataService {
    pub fn new(
        config: ForexConfig,
        source: Arc<dyn RateSource>,
        oracle: Arc<dyn SentimentOracle>,
    ) -> Self {
        Self {
            config,
            source,
            oracle,
            state: tokio::sync::Mutex::new(State::default()),
        }
    }

    /// Service wired to the live HTTP source and the rule-based oracle.
    pub fn with_http_source(config: ForexConfig) -> anyhow::Result<Self> {
        let source = Arc::new(HttpRateSource::new(config.source_url.clone())?);
        Ok(Self::new(config, source, Arc::new(RuleBasedOracle)))
    }

    /// Current rates for the published pair set. Serves the cache within the
    /// fetch interval and the backoff window; on upstream failure returns the
    /// cache, or a static fallback table before the first success.
    pub async fn get_rates(&self) -> HashMap<String, f64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if !state.latest_rates.is_empty() {
            if let Some(last_fetch) = state.last_fetch {
                if now.duration_since(last_fetch) < self.config.min_fetch_interval {
                    return state.latest_rates.clone();
                }
            }
        }
        if let Some(next_retry) = state.next_retry {
            if now < next_retry {
                return if state.latest_rates.is_empty() {
                    fallback_rates()
                } else {
                    state.latest_rates.clone()
                };
            }
        }

        match self.source.fetch_usd_table().await {
            Ok(usd_base) => {
                let clean = derive_published_pairs(&usd_base);
                if clean.is_empty() {
                    self.record_failure(&mut state, "rate source returned no usable pairs");
                } else {
                    state.latest_usd_base = usd_base;
                    state.latest_rates = clean.clone();
                    for (pair, price) in &clean {
                        push_history(&mut state.history, pair, *price);
                    }
                    state.last_fetch = Some(now);
                    state.failure_streak = 0;
                    state.next_retry = None;
                    return clean;
                }
            }
            Err(error) => {
                self.record_failure(&mut state, &format!("{error:#}"));
            }
        }

        if state.latest_rates.is_empty() {
            fallback_rates()
        } else {
            state.latest_rates.clone()
        }
    }

    fn record_failure(&self, state: &mut State, error_text: &str) {
        let now = Instant::now();
        state.failure_streak += 1;
        let backoff_seconds = (2u64.pow(state.failure_streak.min(6))).min(90);
        state.next_retry = Some(now + Duration::from_secs(backoff_seconds));

        let should_log = error_text != state.last_error_text
            || state
                .last_error_log
                .map_or(true, |at| now.duration_since(at) >= Duration::from_secs(30));
        if should_log {
            tracing::warn!(
                error = error_text,
                backoff_seconds,
                streak = state.failure_streak,
                "rate fetch failed"
            );
            state.last_error_text = error_text.to_string();
            state.last_error_log = Some(now);
        }
    }

    /// Economic calendar events. A structured stub until a provider is wired
    /// in, cached on a short TTL like the live endpoints.
    pub async fn get_news(&self) -> Vec<serde_json::Value> {
        let mut state = self.state.lock().await;
        if let Some((at, cached)) = &state.news_cache {
            if at.elapsed() < self.config.news_ttl {
                return cached.clone();
            }
        }
        let now = chrono::Utc::now().to_rfc3339();
        let news = vec![
            serde_json::json!({
                "time": now,
                "currency": "USD",
                "impact": "high",
                "event": "Non-Farm Payrolls",
                "actual": "N/A",
                "forecast": "180K",
                "previous": "199K",
            }),
            serde_json::json!({
                "time": now,
                "currency": "EUR",
                "impact": "medium",
                "event": "ECB Interest Rate Decision",
                "actual": "N/A",
                "forecast": "4.50%",
                "previous": "4.50%",
            }),
        ];
        state.news_cache = Some((Instant::now(), news.clone()));
        news
    }

    /// Market sentiment from the configured oracle, cached on a short TTL to
    /// avoid duplicate analysis per streaming cycle.
    pub async fn get_sentiment(&self) -> MarketSentiment {
        {
            let state = self.state.lock().await;
            if let Some((at, cached)) = &state.sentiment_cache {
                if at.elapsed() < self.config.sentiment_ttl {
                    return cached.clone();
                }
            }
        }

        let rates = self.get_rates().await;
        let news = self.get_news().await;
        let sentiment = self.oracle.analyze(&rates, &news).await;

        let mut state = self.state.lock().await;
        state.sentiment_cache = Some((Instant::now(), sentiment.clone()));
        sentiment
    }

    /// Structured near-term forecast for one pair.
    pub async fn forecast_pair(
        &self,
        pair: &str,
        horizon: models::ForecastHorizon,
    ) -> Result<models::ForecastResult, Error> {
        let pair = normalize_pair(pair);

        {
            let state = self.state.lock().await;
            if let Some((at, cached)) = state.forecast_cache.get(&(pair.clone(), horizon)) {
                if at.elapsed() < self.config.forecast_ttl {
                    return Ok(cached.clone());
                }
            }
        }

        let rates = self.get_rates().await;
        let sentiment = self.get_sentiment().await;

        let mut state = self.state.lock().await;
        let current_price = match rates.get(&pair).copied() {
            Some(price) => price,
            None => {
                // Derive crosses from the USD-quoted table and start tracking.
                let derived = derive_from_usd_table(&state.latest_usd_base, &pair)
                    .ok_or_else(|| Error::UnavailablePair(pair.clone()))?;
                state.latest_rates.insert(pair.clone(), derived);
                push_history(&mut state.history, &pair, derived);
                derived
            }
        };
        if current_price <= 0.0 {
            return Err(Error::UnavailablePair(pair));
        }

        let history = state.history.get(&pair).cloned().unwrap_or_default();
        let result = forecast::compose(&pair, horizon, current_price, &history, &sentiment);
        state
            .forecast_cache
            .insert((pair, horizon), (Instant::now(), result.clone()));
        Ok(result)
    }

    /// Price history snapshot for one (normalized) pair.
    pub async fn history(&self, pair: &str) -> Vec<f64> {
        let pair = normalize_pair(pair);
        self.state
            .lock()
            .await
            .history
            .get(&pair)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn runtime_stats(&self) -> RuntimeStats {
        let state = self.state.lock().await;
        let next_retry_in = state
            .next_retry
            .map(|at| at.saturating_duration_since(Instant::now()).as_secs_f64())
            .unwrap_or(0.0);
        RuntimeStats {
            cached_pairs: state.latest_rates.len(),
            tracked_histories: state.history.len(),
            rate_failure_streak: state.failure_streak,
            next_rates_retry_in_seconds: next_retry_in,
            min_fetch_interval_seconds: self.config.min_fetch_interval.as_secs(),
        }
    }

    /// Remaining backoff, used to stretch streaming cadence during outages.
    pub async fn backoff_remaining(&self) -> Duration {
        let state = self.state.lock().await;
        state
            .next_retry
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// The periodic live-update payload broadcast to the global topic.
    pub async fn stream_payload(&self) -> serde_json::Value {
        let rates = self.get_rates().await;
        let news = self.get_news().await;
        let sentiment = self.get_sentiment().await;
        serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "rates": rates,
            "news": news.into_iter().take(3).collect::<Vec<_>>(),
            "sentiment": sentiment,
            "type": "live_update",
        })
    }

    /// Synthesize a plausible recent history around a live price when the
    /// tracked history is too shallow for indicator work.
    pub async fn sampled_history(&self, pair: &str, samples: usize) -> Vec<f64> {
        let pair = normalize_pair(pair);
        let tracked = self.history(&pair).await;
        if tracked.len() >= samples {
            return tracked;
        }

        let rates = self.get_rates().await;
        let anchor = rates
            .get(&pair)
            .copied()
            .or(tracked.last().copied())
            .unwrap_or(1.0);
        forecast::synthesize_history(&pair, anchor, samples)
    }
}

pub(crate) fn push_history(history: &mut HashMap<String, Vec<f64>>, pair: &str, price: f64) {
    let entry = history.entry(pair.to_string()).or_default();
    entry.push(price);
    if entry.len() > HISTORY_CAP {
        let excess = entry.len() - HISTORY_CAP;
        entry.drain(..excess);
    }
}

/// Normalize user-facing pair spellings: `eur/usd`, `EURUSD`, `eur-usd`
/// all become `EUR/USD`.
pub fn normalize_pair(pair: &str) -> String {
    let cleaned: String = pair
        .trim()
        .to_ascii_uppercase()
        .replace('-', "/")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.contains('/') {
        return cleaned;
    }
    if cleaned.len() == 6 {
        return format!("{}/{}", &cleaned[..3], &cleaned[3..]);
    }
    cleaned
}

/// Display precision: JPY and PKR pairs quote to 2 digits, everything else 4.
pub fn pair_digits(pair: &str) -> usize {
    let upper = pair.to_ascii_uppercase();
    if upper.contains("JPY") || upper.contains("PKR") {
        2
    } else {
        4
    }
}

fn derive_published_pairs(usd_base: &HashMap<String, f64>) -> HashMap<String, f64> {
    PUBLISHED_PAIRS
        .iter()
        .filter_map(|pair| {
            derive_from_usd_table(usd_base, pair)
                .filter(|price| price.is_finite() && *price > 0.0)
                .map(|price| (pair.to_string(), price))
        })
        .collect()
}

/// Resolve an arbitrary BASE/QUOTE pair from a USD-quoted table: inverse for
/// XXX/USD, direct for USD/XXX, and the ratio for crosses.
pub(crate) fn derive_from_usd_table(
    usd_base: &HashMap<String, f64>,
    pair: &str,
) -> Option<f64> {
    let (base, quote) = pair.split_once('/')?;
    if base == quote {
        return Some(1.0);
    }
    if base == "USD" {
        return usd_base.get(quote).copied().filter(|v| *v > 0.0);
    }
    if quote == "USD" {
        return usd_base
            .get(base)
            .copied()
            .filter(|v| *v > 0.0)
            .map(|v| 1.0 / v);
    }
    let base_rate = usd_base.get(base).copied().filter(|v| *v > 0.0)?;
    let quote_rate = usd_base.get(quote).copied().filter(|v| *v > 0.0)?;
    Some(quote_rate / base_rate)
}

/// Served before the first successful upstream fetch.
fn fallback_rates() -> HashMap<String, f64> {
    [
        ("EUR/USD", 1.08),
        ("GBP/USD", 1.27),
        ("USD/JPY", 154.0),
        ("USD/CHF", 0.78),
        ("AUD/USD", 0.66),
        ("USD/CAD", 1.37),
        ("NZD/USD", 0.60),
        ("USD/PKR", 279.0),
    ]
    .into_iter()
    .map(|(pair, price)| (pair.to_string(), price))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubSource {
        fn table() -> HashMap<String, f64> {
            [
                ("EUR", 0.9259),
                ("GBP", 0.7874),
                ("JPY", 154.0),
                ("CHF", 0.78),
                ("AUD", 1.5151),
                ("CAD", 1.37),
                ("NZD", 1.6666),
                ("PKR", 279.0),
            ]
            .into_iter()
            .map(|(code, rate)| (code.to_string(), rate))
            .collect()
        }
    }

    #[async_trait::async_trait]
    impl RateSource for StubSource {
        async fn fetch_usd_table(&self) -> anyhow::Result<HashMap<String, f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("HTTP 503 from rate source")
            }
            Ok(Self::table())
        }
    }

    fn service(fail: bool) -> (ForexDataService, Arc<StubSource>) {
        let source = Arc::new(StubSource {
            calls: AtomicUsize::new(0),
            fail,
        });
        let service = ForexDataService::new(
            ForexConfig::default(),
            source.clone(),
            Arc::new(RuleBasedOracle),
        );
        (service, source)
    }

    #[tokio::test]
    async fn rates_are_cached_within_the_fetch_interval() {
        let (service, source) = service(false);
        let first = service.get_rates().await;
        let second = service.get_rates().await;
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let eur_usd = first["EUR/USD"];
        assert!((eur_usd - 1.0 / 0.9259).abs() < 1e-9);
        assert_eq!(first["USD/JPY"], 154.0);
    }

    #[tokio::test]
    async fn failures_back_off_and_serve_the_fallback_table() {
        let (service, source) = service(true);
        let rates = service.get_rates().await;
        assert_eq!(rates["EUR/USD"], 1.08);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Inside the backoff window the source is not touched again.
        let rates = service.get_rates().await;
        assert_eq!(rates["USD/PKR"], 279.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let stats = service.runtime_stats().await;
        assert_eq!(stats.rate_failure_streak, 1);
        assert!(stats.next_rates_retry_in_seconds > 0.0);
    }

    #[tokio::test]
    async fn forecast_normalizes_pair_spellings() {
        let (service, _) = service(false);
        let result = service
            .forecast_pair("eurusd", models::ForecastHorizon::OneDay)
            .await
            .unwrap();
        assert_eq!(result.pair, "EUR/USD");
        assert!((45..=92).contains(&result.confidence_percent));
    }

    #[tokio::test]
    async fn forecast_derives_crosses_from_the_usd_table() {
        let (service, _) = service(false);
        let result = service
            .forecast_pair("EUR/GBP", models::ForecastHorizon::OneWeek)
            .await
            .unwrap();
        let expected = 0.7874 / 0.9259;
        assert!((result.current_price - expected).abs() < 1e-3);
    }

    #[tokio::test]
    async fn forecast_rejects_unknown_pairs() {
        let (service, _) = service(false);
        let error = service
            .forecast_pair("XXX/YYY", models::ForecastHorizon::OneDay)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::UnavailablePair(pair) if pair == "XXX/YYY"));
    }

    #[tokio::test]
    async fn forecasts_are_cached_per_pair_and_horizon() {
        let (service, source) = service(false);
        let first = service
            .forecast_pair("EUR/USD", models::ForecastHorizon::OneDay)
            .await
            .unwrap();
        let second = service
            .forecast_pair("EUR/USD", models::ForecastHorizon::OneDay)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pair_normalization_handles_common_spellings() {
        assert_eq!(normalize_pair("eur/usd"), "EUR/USD");
        assert_eq!(normalize_pair("EURUSD"), "EUR/USD");
        assert_eq!(normalize_pair("eur-usd"), "EUR/USD");
        assert_eq!(normalize_pair(" usd/jpy "), "USD/JPY");
    }

    #[test]
    fn digits_follow_quote_convention() {
        assert_eq!(pair_digits("USD/JPY"), 2);
        assert_eq!(pair_digits("USD/PKR"), 2);
        assert_eq!(pair_digits("EUR/USD"), 4);
    }

    #[test]
    fn history_is_trimmed_at_the_cap() {
        let mut history = HashMap::new();
        for i in 0..300 {
            push_history(&mut history, "EUR/USD", i as f64);
        }
        let series = &history["EUR/USD"];
        assert_eq!(series.len(), HISTORY_CAP);
        assert_eq!(series[0], 60.0);
        assert_eq!(*series.last().unwrap(), 299.0);
    }
}
