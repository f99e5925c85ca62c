mod envelope;
mod event;
mod market;
mod task;

pub use envelope::{is_envelope_value, normalize_data, ApiEnvelope, ResponseStatus};
pub use event::{EventFrame, UpdateType};
pub use market::{
    ExpectedChange, ForecastHorizon, ForecastResult, Macd, MarketCondition, SignalAction,
    TargetRange, TradingSignal, Trend, Volatility,
};
pub use task::{Priority, TaskKind, TaskRecord, TaskStatus, TaskStep};

/// The reserved topic which receives broadcasts addressed to every session.
pub const GLOBAL_TOPIC: &str = "global";
