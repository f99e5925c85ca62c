use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market direction as read from moving-average structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

/// Coarse volatility band used by sentiment and forecasting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MarketCondition is the full technical read of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCondition {
    pub pair: String,
    pub current_price: f64,
    pub trend: Trend,
    pub volatility: f64,
    pub support_level: f64,
    pub resistance_level: f64,
    pub rsi: f64,
    pub macd: Macd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// TradingSignal is the strategy engine's actionable output for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub pair: String,
    pub action: SignalAction,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// ForecastHorizon selects the lookback and base magnitude of a forecast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForecastHorizon {
    #[serde(rename = "intraday")]
    Intraday,
    #[default]
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

impl ForecastHorizon {
    /// Parse user-facing synonyms; unknown values fall back to one day.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "intraday" | "intra" | "4h" | "6h" | "12h" | "today" => ForecastHorizon::Intraday,
            "1w" | "week" | "weekly" | "7d" | "7day" => ForecastHorizon::OneWeek,
            _ => ForecastHorizon::OneDay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedChange {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub low: f64,
    pub high: f64,
}

/// ForecastResult is the structured near-term outlook for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub pair: String,
    pub horizon: ForecastHorizon,
    pub generated_at: DateTime<Utc>,
    pub current_price: f64,
    pub trend_bias: String,
    pub volatility: Volatility,
    pub risk_level: String,
    pub confidence_percent: u32,
    pub expected_change_percent: ExpectedChange,
    pub target_range: TargetRange,
    pub timing_guidance: String,
    pub supporting_factors: Vec<String>,
    pub disclaimer: String,
}
