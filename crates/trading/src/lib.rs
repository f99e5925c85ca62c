//! Rule-based strategy and risk engines for the auto-trade workflow.
//!
//! Both are pure and synchronous: the strategy engine votes over the
//! technical read of a pair, and the risk engine gates execution, sizes
//! positions from user limits, and walks open positions against live rates.

mod risk;
mod strategy;

pub use risk::{ClosedPosition, Position, PositionStatus, RiskEngine, UserLimits};
pub use strategy::StrategyEngine;
