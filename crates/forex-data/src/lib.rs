//! Upstream rate acquisition, technical analysis, and forecasting.

pub mod analysis;
mod forecast;
mod service;

pub use service::{
    normalize_pair, pair_digits, Error, ForexConfig, ForexDataService, HttpRateSource,
    MarketSentiment, RateSource, RuleBasedOracle, RuntimeStats, SentimentOracle,
};
