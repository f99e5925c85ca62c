use models::{MarketCondition, SignalAction, TradingSignal, Trend};

/// Generates trading signals from market conditions by a weighted vote of
/// RSI extremes, MACD histogram sign, the trend tag, and proximity to
/// support/resistance.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrategyEngine;

impl StrategyEngine {
    pub fn generate_signal(&self, condition: &MarketCondition) -> TradingSignal {
        let entry_price = condition.current_price;
        let mut votes: Vec<(SignalAction, f64, &str)> = Vec::new();

        if condition.rsi < 30.0 {
            votes.push((SignalAction::Buy, 0.7, "RSI oversold"));
        } else if condition.rsi > 70.0 {
            votes.push((SignalAction::Sell, 0.7, "RSI overbought"));
        }

        if condition.macd.histogram > 0.0 {
            votes.push((SignalAction::Buy, 0.6, "MACD bullish crossover"));
        } else if condition.macd.histogram < 0.0 {
            votes.push((SignalAction::Sell, 0.6, "MACD bearish crossover"));
        }

        match condition.trend {
            Trend::Bullish => votes.push((SignalAction::Buy, 0.8, "Strong uptrend")),
            Trend::Bearish => votes.push((SignalAction::Sell, 0.8, "Strong downtrend")),
            Trend::Sideways => {}
        }

        if entry_price <= condition.support_level * 1.01 {
            votes.push((SignalAction::Buy, 0.9, "Price at support"));
        } else if entry_price >= condition.resistance_level * 0.99 {
            votes.push((SignalAction::Sell, 0.9, "Price at resistance"));
        }

        let mut action = SignalAction::Hold;
        let mut confidence = 0.0;
        let mut reason = String::new();
        let mut stop_loss = 0.0;
        let mut take_profit = 0.0;

        if !votes.is_empty() {
            let total = votes.len() as f64;
            let buy_confidence: f64 = votes
                .iter()
                .filter(|(a, ..)| *a == SignalAction::Buy)
                .map(|(_, weight, _)| weight)
                .sum::<f64>()
                / total;
            let sell_confidence: f64 = votes
                .iter()
                .filter(|(a, ..)| *a == SignalAction::Sell)
                .map(|(_, weight, _)| weight)
                .sum::<f64>()
                / total;

            let join = |side: SignalAction| {
                votes
                    .iter()
                    .filter(|(a, ..)| *a == side)
                    .map(|(.., r)| *r)
                    .collect::<Vec<_>>()
                    .join(", ")
            };

            if buy_confidence > sell_confidence && buy_confidence > 0.5 {
                action = SignalAction::Buy;
                confidence = buy_confidence;
                reason = join(SignalAction::Buy);
                stop_loss = condition.support_level;
                take_profit = entry_price * 1.02;
            } else if sell_confidence > buy_confidence && sell_confidence > 0.5 {
                action = SignalAction::Sell;
                confidence = sell_confidence;
                reason = join(SignalAction::Sell);
                stop_loss = condition.resistance_level;
                take_profit = entry_price * 0.98;
            }
        }

        TradingSignal {
            pair: condition.pair.clone(),
            action,
            confidence,
            entry_price,
            stop_loss,
            take_profit,
            reason,
            timestamp: chrono::Utc::now(),
        }
    }
}
