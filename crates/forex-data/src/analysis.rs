//! Technical indicators as pure functions over a price history.

use models::{Macd, MarketCondition, Trend};

/// Relative Strength Index over the first `period` deltas, Wilder-style.
/// Returns the neutral 50 until enough history exists; 100 when there are
/// gains and no losses.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if prices.len() < period + 1 {
        return 50.0;
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: f64 = deltas[..period].iter().filter(|d| **d > 0.0).sum();
    let losses: f64 = deltas[..period].iter().filter(|d| **d < 0.0).map(|d| -d).sum();

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Exponential moving average with multiplier `2 / (period + 1)`, seeded
/// with the first sample. Zero on an empty series.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    let Some((first, rest)) = prices.split_first() else {
        return 0.0;
    };
    let multiplier = 2.0 / (period as f64 + 1.0);
    rest.iter().fold(*first, |acc, price| {
        (price * multiplier) + (acc * (1.0 - multiplier))
    })
}

/// MACD line, signal, and histogram. All zero below 26 samples. The signal
/// is the EMA(9) of the running MACD line series.
pub fn macd(prices: &[f64]) -> Macd {
    if prices.len() < 26 {
        return Macd::default();
    }

    let multiplier_12 = 2.0 / 13.0;
    let multiplier_26 = 2.0 / 27.0;
    let mut ema_12 = prices[0];
    let mut ema_26 = prices[0];
    let mut line_series = Vec::with_capacity(prices.len());
    line_series.push(0.0);
    for price in &prices[1..] {
        ema_12 = (price * multiplier_12) + (ema_12 * (1.0 - multiplier_12));
        ema_26 = (price * multiplier_26) + (ema_26 * (1.0 - multiplier_26));
        line_series.push(ema_12 - ema_26);
    }

    let line = *line_series.last().expect("series is non-empty");
    let signal = ema(&line_series, 9);
    Macd {
        macd: line,
        signal,
        histogram: line - signal,
    }
}

/// Simple moving average of the trailing `period` samples.
pub fn sma(prices: &[f64], period: usize) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    let window = &prices[prices.len().saturating_sub(period)..];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Support and resistance as the min/max of the trailing 50 samples.
pub fn support_resistance(prices: &[f64]) -> (f64, f64) {
    let window = &prices[prices.len().saturating_sub(50)..];
    let support = window.iter().copied().fold(f64::INFINITY, f64::min);
    let resistance = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (support, resistance)
}

/// Trend tag from SMA(20) vs SMA(50) structure and the current price.
pub fn trend(prices: &[f64]) -> Trend {
    let Some(current) = prices.last().copied() else {
        return Trend::Sideways;
    };
    let sma_20 = sma(prices, 20);
    let sma_50 = if prices.len() >= 50 {
        sma(prices, 50)
    } else {
        sma_20
    };

    if sma_20 > sma_50 && current > sma_20 {
        Trend::Bullish
    } else if sma_20 < sma_50 && current < sma_20 {
        Trend::Bearish
    } else {
        Trend::Sideways
    }
}

/// Population standard deviation of the trailing 20 samples.
pub fn volatility(prices: &[f64]) -> f64 {
    let window = &prices[prices.len().saturating_sub(20)..];
    if window.is_empty() {
        return 0.0;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let variance =
        window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / window.len() as f64;
    variance.sqrt()
}

/// The full technical read of one pair from its price history.
/// The last sample is taken as the current price.
pub fn market_condition(pair: &str, prices: &[f64]) -> MarketCondition {
    let current_price = prices.last().copied().unwrap_or_default();
    let (support_level, resistance_level) = support_resistance(prices);
    MarketCondition {
        pair: pair.to_string(),
        current_price,
        trend: trend(prices),
        volatility: volatility(prices),
        support_level,
        resistance_level,
        rsi: rsi(prices, 14),
        macd: macd(prices),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_is_neutral_below_minimum_history() {
        let prices: Vec<f64> = (0..14).map(|i| 1.0 + i as f64 * 0.001).collect();
        assert_eq!(rsi(&prices, 14), 50.0);
    }

    #[test]
    fn rsi_is_one_hundred_for_monotonic_gains() {
        let prices: Vec<f64> = (0..20).map(|i| 1.0 + i as f64 * 0.001).collect();
        assert_eq!(rsi(&prices, 14), 100.0);
    }

    #[test]
    fn rsi_on_a_flat_series_stays_neutral() {
        // No gains and no losses: avg_loss is zero but so is avg_gain, and the
        // short-history guard keeps small inputs at 50.
        let prices = vec![1.1; 10];
        assert_eq!(rsi(&prices, 14), 50.0);
    }

    #[test]
    fn rsi_reflects_losses() {
        let prices: Vec<f64> = (0..20).map(|i| 2.0 - i as f64 * 0.001).collect();
        let value = rsi(&prices, 14);
        assert!(value < 1.0, "all-loss series should be near zero, got {value}");
    }

    #[test]
    fn macd_is_zero_below_26_samples() {
        let prices: Vec<f64> = (0..25).map(|i| 1.0 + i as f64 * 0.01).collect();
        assert_eq!(macd(&prices), Macd::default());
    }

    #[test]
    fn macd_is_positive_in_an_uptrend() {
        let prices: Vec<f64> = (0..60).map(|i| 1.0 + i as f64 * 0.01).collect();
        let result = macd(&prices);
        assert!(result.macd > 0.0);
        assert!(result.histogram > 0.0);
        assert!((result.macd - result.signal - result.histogram).abs() < 1e-12);
    }

    #[test]
    fn ema_seeds_with_the_first_sample() {
        assert_eq!(ema(&[1.5], 12), 1.5);
        assert_eq!(ema(&[], 12), 0.0);
        // Multiplier 2/(2+1): 1.0 then (2.0 * 2/3) + (1.0 * 1/3).
        let value = ema(&[1.0, 2.0], 2);
        assert!((value - (2.0 * 2.0 / 3.0 + 1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn support_resistance_uses_the_trailing_window() {
        let mut prices = vec![5.0; 10];
        prices.extend((0..50).map(|i| 1.0 + i as f64 * 0.01));
        let (support, resistance) = support_resistance(&prices);
        // The early 5.0 spike falls outside the 50-sample window.
        assert_eq!(support, 1.0);
        assert!((resistance - 1.49).abs() < 1e-9);
    }

    #[test]
    fn trend_tags_follow_moving_average_structure() {
        let rising: Vec<f64> = (0..60).map(|i| 1.0 + i as f64 * 0.01).collect();
        assert_eq!(trend(&rising), Trend::Bullish);

        let falling: Vec<f64> = (0..60).map(|i| 2.0 - i as f64 * 0.01).collect();
        assert_eq!(trend(&falling), Trend::Bearish);

        let flat = vec![1.0; 60];
        assert_eq!(trend(&flat), Trend::Sideways);

        // Below 50 samples SMA(50) mirrors SMA(20), so nothing is strict.
        let short: Vec<f64> = (0..30).map(|i| 1.0 + i as f64 * 0.01).collect();
        assert_eq!(trend(&short), Trend::Sideways);
    }

    #[test]
    fn volatility_is_zero_on_flat_prices() {
        assert_eq!(volatility(&[1.2; 30]), 0.0);
        assert!(volatility(&[1.0, 2.0, 1.0, 2.0]) > 0.0);
    }
}
