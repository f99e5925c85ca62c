use models::{SignalAction, TradingSignal};
use serde::{Deserialize, Serialize};

/// Per-user trading limits supplied with an auto-trade task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserLimits {
    pub max_loss_per_trade: f64,
    pub max_daily_loss: f64,
    pub take_profit_at: f64,
    pub stop_loss_at: f64,
    pub max_position_size: f64,
}

impl Default for UserLimits {
    fn default() -> Self {
        Self {
            max_loss_per_trade: 100.0,
            max_daily_loss: 500.0,
            take_profit_at: 100.0,
            stop_loss_at: 50.0,
            max_position_size: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A simulated open position created from an executed signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub pair: String,
    pub action: SignalAction,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    pub status: PositionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    #[serde(flatten)]
    pub position: Position,
    pub close_price: f64,
    pub profit: f64,
    pub close_reason: String,
}

/// Gates signal execution and manages the position lifecycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskEngine;

impl RiskEngine {
    /// Whether a signal clears the confidence bar. Hold signals never do.
    pub fn can_execute(&self, signal: &TradingSignal, min_confidence: f64) -> Result<(), String> {
        if signal.action == SignalAction::Hold {
            return Err("Signal action is HOLD".to_string());
        }
        if signal.confidence < min_confidence {
            return Err("Confidence too low".to_string());
        }
        Ok(())
    }

    /// Size a position from the user's limits. Quantity is the position
    /// budget divided by the entry price.
    pub fn build_position(&self, signal: &TradingSignal, limits: &UserLimits) -> Position {
        let quantity = if signal.entry_price > 0.0 {
            limits.max_position_size / signal.entry_price
        } else {
            0.0
        };
        Position {
            pair: signal.pair.clone(),
            action: signal.action,
            entry_price: signal.entry_price,
            quantity,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            opened_at: signal.timestamp,
            status: PositionStatus::Open,
        }
    }

    /// Walk one open position against the current price; `Some` when a
    /// take-profit or stop-loss level is reached.
    pub fn evaluate_position(
        &self,
        position: &Position,
        current_price: f64,
    ) -> Option<ClosedPosition> {
        let close_reason = match position.action {
            SignalAction::Buy => {
                if position.stop_loss > 0.0 && current_price <= position.stop_loss {
                    Some(format!("Stop-loss triggered at {current_price}"))
                } else if position.take_profit > 0.0 && current_price >= position.take_profit {
                    Some(format!("Take-profit triggered at {current_price}"))
                } else {
                    None
                }
            }
            SignalAction::Sell => {
                if position.stop_loss > 0.0 && current_price >= position.stop_loss {
                    Some(format!("Stop-loss triggered at {current_price}"))
                } else if position.take_profit > 0.0 && current_price <= position.take_profit {
                    Some(format!("Take-profit triggered at {current_price}"))
                } else {
                    None
                }
            }
            SignalAction::Hold => None,
        }?;

        let profit = match position.action {
            SignalAction::Buy => (current_price - position.entry_price) * position.quantity,
            SignalAction::Sell => (position.entry_price - current_price) * position.quantity,
            SignalAction::Hold => 0.0,
        };

        let mut closed = position.clone();
        closed.status = PositionStatus::Closed;
        Some(ClosedPosition {
            position: closed,
            close_price: current_price,
            profit,
            close_reason,
        })
    }
}
