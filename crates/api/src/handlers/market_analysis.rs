use super::{report_url, TaskArgs, TaskContext, STEP_PACING};
use forex_data::{analysis, normalize_pair};
use models::{ForecastHorizon, TaskStatus, UpdateType};
use trading::StrategyEngine;

/// Indicator work wants a reasonable lookback even for a fresh pair.
const SAMPLE_DEPTH: usize = 60;

pub async fn run(ctx: &TaskContext, args: &TaskArgs) -> anyhow::Result<()> {
    let task_id = &args.task_id;
    let strategy = StrategyEngine;

    ctx.emitter
        .send_progress(task_id, "Fetching Data", 0.2, "Fetching live market data")
        .await;
    let _rates = ctx.forex.get_rates().await;
    tokio::time::sleep(STEP_PACING).await;
    ctx.store.complete_step(task_id, "Fetching Data").await?;

    ctx.emitter
        .send_progress(
            task_id,
            "Analyzing Markets",
            0.4,
            "Computing technical indicators",
        )
        .await;
    let mut conditions = Vec::new();
    for pair in &args.currency_pairs {
        let pair = normalize_pair(pair);
        let history = ctx.forex.sampled_history(&pair, SAMPLE_DEPTH).await;
        conditions.push(analysis::market_condition(&pair, &history));
    }
    tokio::time::sleep(STEP_PACING).await;
    ctx.store.complete_step(task_id, "Analyzing Markets").await?;

    ctx.emitter
        .send_progress(task_id, "Generating Signals", 0.6, "Deriving trade signals")
        .await;
    let mut signals = Vec::new();
    for condition in &conditions {
        let signal = strategy.generate_signal(condition);
        let action = serde_json::to_value(signal.action)?;
        let mut data = serde_json::json!({
            "pair": signal.pair,
            "action": action,
            "confidence": signal.confidence,
            "entry_price": signal.entry_price,
            "reason": signal.reason,
            "rsi": condition.rsi,
            "trend": condition.trend,
            "support": condition.support_level,
            "resistance": condition.resistance_level,
        });
        if args.include_forecast {
            let horizon = args
                .forecast_horizon_hours
                .map(horizon_from_hours)
                .unwrap_or_default();
            if let Ok(forecast) = ctx.forex.forecast_pair(&signal.pair, horizon).await {
                data["forecast"] = serde_json::to_value(&forecast)?;
            }
        }
        ctx.emitter
            .send_update(
                task_id,
                &format!(
                    "{} analysis complete: {}",
                    signal.pair,
                    action.as_str().unwrap_or("HOLD")
                ),
                UpdateType::Info,
                None,
                Some(data),
            )
            .await;
        signals.push(signal);
    }
    ctx.store.complete_step(task_id, "Generating Signals").await?;

    ctx.emitter
        .send_progress(
            task_id,
            "Generating Report",
            0.8,
            "Compiling analysis report",
        )
        .await;
    tokio::time::sleep(STEP_PACING).await;
    let file_url = report_url(task_id, "market_analysis");
    ctx.store.set_result_url(task_id, &file_url).await?;
    ctx.store.complete_step(task_id, "Generating Report").await?;
    ctx.store.set_status(task_id, TaskStatus::Completed).await?;

    ctx.emitter
        .send_complete(
            task_id,
            serde_json::json!({
                "file_url": file_url,
                "pairs_analyzed": signals.len(),
                "signals": signals,
            }),
        )
        .await;
    Ok(())
}

fn horizon_from_hours(hours: u32) -> ForecastHorizon {
    if hours <= 12 {
        ForecastHorizon::Intraday
    } else if hours <= 36 {
        ForecastHorizon::OneDay
    } else {
        ForecastHorizon::OneWeek
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{seed_task, test_context};
    use crate::task_store::TaskStore as _;
    use models::TaskKind;

    #[tokio::test(start_paused = true)]
    async fn emits_the_full_frame_sequence_and_completes_the_record() {
        let (ctx, emitter, store) = test_context();
        seed_task(&store, TaskKind::MarketAnalysis, "task-1").await;

        let args = TaskArgs {
            task_id: "task-1".to_string(),
            user_id: Some("user-1".to_string()),
            currency_pairs: vec!["EUR/USD".to_string()],
            user_limits: None,
            include_forecast: true,
            forecast_horizon_hours: Some(24),
            analysis_period_hours: None,
        };
        run(&ctx, &args).await.unwrap();

        let frames = emitter.frames.lock().unwrap().clone();
        let progress: Vec<(String, Option<f64>)> = frames
            .iter()
            .filter(|f| f.kind == UpdateType::Progress)
            .map(|f| (f.message.clone(), f.progress))
            .collect();
        assert_eq!(progress.len(), 4);
        assert!(progress[0].0.starts_with("Fetching Data"));
        assert_eq!(progress[0].1, Some(0.2));
        assert!(progress[1].0.starts_with("Analyzing Markets"));
        assert_eq!(progress[1].1, Some(0.4));
        assert!(progress[3].0.starts_with("Generating Report"));
        assert_eq!(progress[3].1, Some(0.8));

        let infos: Vec<_> = frames
            .iter()
            .filter(|f| f.kind == UpdateType::Info)
            .collect();
        assert_eq!(infos.len(), 1);
        let data = infos[0].data.as_ref().unwrap();
        assert_eq!(data["pair"], "EUR/USD");
        assert!(["BUY", "SELL", "HOLD"]
            .contains(&data["action"].as_str().unwrap()));
        assert!(data.get("forecast").is_some());

        let last = frames.last().unwrap();
        assert_eq!(last.kind, UpdateType::Success);
        assert_eq!(last.progress, Some(1.0));
        let file_url = last.data.as_ref().unwrap()["file_url"].as_str().unwrap();
        assert!(file_url.ends_with("_market_analysis.pdf"));

        let record = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.current_step, 4);
        assert_eq!(record.result_file_url.as_deref(), Some(file_url));
    }
}
