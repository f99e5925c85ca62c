use super::{TaskArgs, TaskContext, STEP_PACING};
use forex_data::{analysis, normalize_pair};
use models::{TaskStatus, UpdateType};
use std::collections::HashMap;
use trading::{ClosedPosition, Position, RiskEngine, StrategyEngine};

/// Signals below this confidence are not executed.
const CONFIDENCE_THRESHOLD: f64 = 0.7;
/// The demo monitoring loop is bounded; a production deployment would run
/// until the task is stopped.
const MONITOR_ITERATIONS: usize = 3;
const SAMPLE_DEPTH: usize = 60;

pub async fn run(ctx: &TaskContext, args: &TaskArgs) -> anyhow::Result<()> {
    let task_id = &args.task_id;
    let limits = args
        .user_limits
        .clone()
        .ok_or_else(|| anyhow::anyhow!("auto_trade requires user_limits"))?;

    let strategy = StrategyEngine;
    let risk = RiskEngine;

    ctx.emitter
        .send_progress(
            task_id,
            "Initializing Engine",
            0.2,
            "Preparing strategy and risk engines",
        )
        .await;
    tokio::time::sleep(STEP_PACING).await;
    ctx.store.complete_step(task_id, "Initializing Engine").await?;

    ctx.emitter
        .send_progress(
            task_id,
            "Monitoring Markets",
            0.4,
            "Watching pairs for qualifying signals",
        )
        .await;
    let mut latest_signals = HashMap::new();
    for _ in 0..MONITOR_ITERATIONS {
        let _rates = ctx.forex.get_rates().await;
        for pair in &args.currency_pairs {
            let pair = normalize_pair(pair);
            let history = ctx.forex.sampled_history(&pair, SAMPLE_DEPTH).await;
            let condition = analysis::market_condition(&pair, &history);
            latest_signals.insert(pair, strategy.generate_signal(&condition));
        }
        tokio::time::sleep(STEP_PACING).await;
    }
    ctx.store.complete_step(task_id, "Monitoring Markets").await?;

    ctx.emitter
        .send_progress(
            task_id,
            "Executing Trades",
            0.6,
            "Opening positions for qualifying signals",
        )
        .await;
    let mut open_positions: HashMap<String, Position> = HashMap::new();
    for (pair, signal) in &latest_signals {
        match risk.can_execute(signal, CONFIDENCE_THRESHOLD) {
            Ok(()) => {
                let position = risk.build_position(signal, &limits);
                ctx.emitter
                    .send_update(
                        task_id,
                        &format!("Opened simulated position on {pair}"),
                        UpdateType::Info,
                        None,
                        Some(serde_json::json!({
                            "position": position,
                            "signal_confidence": signal.confidence,
                            "reason": signal.reason,
                        })),
                    )
                    .await;
                open_positions.insert(pair.clone(), position);
            }
            Err(reason) => {
                tracing::debug!(%task_id, %pair, %reason, "signal not executed");
            }
        }
    }
    ctx.store.complete_step(task_id, "Executing Trades").await?;

    ctx.emitter
        .send_progress(
            task_id,
            "Managing Positions",
            0.8,
            "Walking live rates against open positions",
        )
        .await;
    let mut closed: Vec<ClosedPosition> = Vec::new();
    for _ in 0..MONITOR_ITERATIONS {
        if open_positions.is_empty() {
            break;
        }
        let rates = ctx.forex.get_rates().await;
        let mut done = Vec::new();
        for (pair, position) in &open_positions {
            let Some(price) = rates.get(pair) else {
                continue;
            };
            if let Some(close) = risk.evaluate_position(position, *price) {
                ctx.emitter
                    .send_update(
                        task_id,
                        &format!("Closed position on {pair}: {}", close.close_reason),
                        UpdateType::Info,
                        None,
                        Some(serde_json::to_value(&close)?),
                    )
                    .await;
                done.push(pair.clone());
                closed.push(close);
            }
        }
        for pair in done {
            open_positions.remove(&pair);
        }
        tokio::time::sleep(STEP_PACING).await;
    }
    ctx.store.complete_step(task_id, "Managing Positions").await?;
    ctx.store.set_status(task_id, TaskStatus::Completed).await?;

    let total_pnl: f64 = closed.iter().map(|c| c.profit).sum();
    ctx.emitter
        .send_complete(
            task_id,
            serde_json::json!({
                "opened": open_positions.len() + closed.len(),
                "closed": closed.len(),
                "still_open": open_positions.len(),
                "total_pnl": total_pnl,
            }),
        )
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{seed_task, test_context};
    use crate::task_store::TaskStore as _;
    use models::TaskKind;

    fn args(user_limits: Option<trading::UserLimits>) -> TaskArgs {
        TaskArgs {
            task_id: "task-at".to_string(),
            user_id: Some("user-1".to_string()),
            currency_pairs: vec!["EUR/USD".to_string(), "USD/JPY".to_string()],
            user_limits,
            include_forecast: false,
            forecast_horizon_hours: None,
            analysis_period_hours: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn requires_user_limits() {
        let (ctx, _emitter, store) = test_context();
        seed_task(&store, TaskKind::AutoTrade, "task-at").await;

        let error = run(&ctx, &args(None)).await.unwrap_err();
        assert!(error.to_string().contains("user_limits"));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_all_steps_with_limits() {
        let (ctx, emitter, store) = test_context();
        seed_task(&store, TaskKind::AutoTrade, "task-at").await;

        run(&ctx, &args(Some(trading::UserLimits::default())))
            .await
            .unwrap();

        let record = store.get("task-at").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.current_step, 4);

        let frames = emitter.frames.lock().unwrap().clone();
        let last = frames.last().unwrap();
        assert_eq!(last.kind, UpdateType::Success);
        assert!(last.data.as_ref().unwrap().get("total_pnl").is_some());
    }
}
