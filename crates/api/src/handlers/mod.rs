//! Task handlers: step machines publishing events to the task's topic and
//! updating the task record through the store. Handlers receive capability
//! objects (emitter, store, forex) at dispatch time and return a structured
//! result; the single boundary catch in `dispatch` classifies failures,
//! emits the error event, and marks the record failed.

mod auto_trade;
mod forecast;
mod market_analysis;

use connections::EventEmitter;
use models::{TaskKind, TaskStatus};
use std::sync::Arc;
use std::time::Duration;

/// Inter-step pacing so subscribers observe distinct progress frames.
pub(crate) const STEP_PACING: Duration = Duration::from_millis(200);

/// Job payload for a queued task: JSON-serializable so the shared queue
/// backend can carry it across processes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskArgs {
    pub task_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_pairs")]
    pub currency_pairs: Vec<String>,
    #[serde(default)]
    pub user_limits: Option<trading::UserLimits>,
    #[serde(default)]
    pub include_forecast: bool,
    #[serde(default)]
    pub forecast_horizon_hours: Option<u32>,
    #[serde(default)]
    pub analysis_period_hours: Option<u32>,
}

fn default_pairs() -> Vec<String> {
    vec!["EUR/USD".to_string()]
}

/// Capabilities a handler runs with. Handlers never import the connection
/// manager; the emitter is the only event surface they see.
#[derive(Clone)]
pub struct TaskContext {
    pub emitter: Arc<dyn EventEmitter>,
    pub store: Arc<dyn crate::task_store::TaskStore>,
    pub forex: Arc<forex_data::ForexDataService>,
}

/// The step plan persisted into a new task record.
pub fn step_names(kind: TaskKind) -> &'static [&'static str] {
    match kind {
        TaskKind::MarketAnalysis => &[
            "Fetching Data",
            "Analyzing Markets",
            "Generating Signals",
            "Generating Report",
        ],
        TaskKind::AutoTrade => &[
            "Initializing Engine",
            "Monitoring Markets",
            "Executing Trades",
            "Managing Positions",
        ],
        TaskKind::Forecast => &[
            "Collecting Data",
            "Training Model",
            "Generating Predictions",
            "Creating Report",
        ],
    }
}

/// Queue entry point: decode args, run the handler for `kind`, and on any
/// failure emit the error event and transition the record to failed before
/// propagating (so the pool counts the failure).
pub async fn dispatch(
    ctx: TaskContext,
    kind: TaskKind,
    args: serde_json::Value,
) -> anyhow::Result<()> {
    let args: TaskArgs = serde_json::from_value(args)
        .map_err(|error| anyhow::anyhow!("failed to decode task args: {error}"))?;
    let task_id = args.task_id.clone();

    let result = match kind {
        TaskKind::MarketAnalysis => market_analysis::run(&ctx, &args).await,
        TaskKind::AutoTrade => auto_trade::run(&ctx, &args).await,
        TaskKind::Forecast => forecast::run(&ctx, &args).await,
    };

    if let Err(error) = &result {
        tracing::warn!(%task_id, ?kind, ?error, "task handler failed");
        ctx.emitter.send_error(&task_id, &format!("{error:#}")).await;
        let _ = ctx.store.set_status(&task_id, TaskStatus::Failed).await;
    }
    result
}

pub(crate) fn report_url(task_id: &str, suffix: &str) -> String {
    format!("https://storage.copilot-backend.dev/reports/{task_id}_{suffix}.pdf")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use models::UpdateType;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Captures every emitted frame for assertions.
    #[derive(Default)]
    pub struct RecordingEmitter {
        pub frames: Mutex<Vec<RecordedFrame>>,
    }

    #[derive(Debug, Clone)]
    pub struct RecordedFrame {
        pub task_id: String,
        pub message: String,
        pub kind: UpdateType,
        pub progress: Option<f64>,
        pub data: Option<serde_json::Value>,
    }

    #[async_trait::async_trait]
    impl EventEmitter for RecordingEmitter {
        async fn send_update(
            &self,
            task_id: &str,
            message: &str,
            kind: UpdateType,
            progress: Option<f64>,
            data: Option<serde_json::Value>,
        ) {
            self.frames.lock().unwrap().push(RecordedFrame {
                task_id: task_id.to_string(),
                message: message.to_string(),
                kind,
                progress,
                data,
            });
        }
    }

    pub struct StubRates;

    #[async_trait::async_trait]
    impl forex_data::RateSource for StubRates {
        async fn fetch_usd_table(&self) -> anyhow::Result<HashMap<String, f64>> {
            Ok([
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
            .collect())
        }
    }

    pub fn test_context() -> (
        TaskContext,
        Arc<RecordingEmitter>,
        Arc<crate::task_store::InMemoryTaskStore>,
    ) {
        let emitter = Arc::new(RecordingEmitter::default());
        let store = Arc::new(crate::task_store::InMemoryTaskStore::default());
        let forex = Arc::new(forex_data::ForexDataService::new(
            forex_data::ForexConfig::default(),
            Arc::new(StubRates),
            Arc::new(forex_data::RuleBasedOracle),
        ));
        let ctx = TaskContext {
            emitter: emitter.clone(),
            store: store.clone(),
            forex,
        };
        (ctx, emitter, store)
    }

    pub async fn seed_task(
        store: &crate::task_store::InMemoryTaskStore,
        kind: TaskKind,
        id: &str,
    ) {
        use crate::task_store::TaskStore as _;
        let record = models::TaskRecord::new(
            id,
            Some("user-1".to_string()),
            "test task",
            "",
            models::Priority::Medium,
            step_names(kind),
        );
        store.insert(record).await.unwrap();
        store
            .set_status(id, models::TaskStatus::Running)
            .await
            .unwrap();
    }
}
