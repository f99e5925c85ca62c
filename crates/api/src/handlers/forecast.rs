use super::{report_url, TaskArgs, TaskContext, STEP_PACING};
use models::{ForecastHorizon, TaskStatus, UpdateType};

pub async fn run(ctx: &TaskContext, args: &TaskArgs) -> anyhow::Result<()> {
    let task_id = &args.task_id;
    let horizon = args
        .forecast_horizon_hours
        .map(|hours| {
            if hours <= 12 {
                ForecastHorizon::Intraday
            } else if hours <= 36 {
                ForecastHorizon::OneDay
            } else {
                ForecastHorizon::OneWeek
            }
        })
        .unwrap_or_default();

    ctx.emitter
        .send_progress(task_id, "Collecting Data", 0.2, "Collecting market history")
        .await;
    let _rates = ctx.forex.get_rates().await;
    tokio::time::sleep(STEP_PACING).await;
    ctx.store.complete_step(task_id, "Collecting Data").await?;

    ctx.emitter
        .send_progress(task_id, "Training Model", 0.4, "Fitting forecast model")
        .await;
    tokio::time::sleep(STEP_PACING).await;
    ctx.store.complete_step(task_id, "Training Model").await?;

    ctx.emitter
        .send_progress(
            task_id,
            "Generating Predictions",
            0.6,
            "Scoring pairs over the requested horizon",
        )
        .await;
    let mut forecasts = Vec::new();
    for pair in &args.currency_pairs {
        match ctx.forex.forecast_pair(pair, horizon).await {
            Ok(forecast) => {
                ctx.emitter
                    .send_update(
                        task_id,
                        &format!("Forecast ready for {}", forecast.pair),
                        UpdateType::Info,
                        None,
                        Some(serde_json::to_value(&forecast)?),
                    )
                    .await;
                forecasts.push(forecast);
            }
            Err(error) => {
                ctx.emitter
                    .send_update(
                        task_id,
                        &format!("{error}"),
                        UpdateType::Warning,
                        None,
                        None,
                    )
                    .await;
            }
        }
    }
    if forecasts.is_empty() {
        anyhow::bail!("no requested pair could be forecast");
    }
    ctx.store
        .complete_step(task_id, "Generating Predictions")
        .await?;

    ctx.emitter
        .send_progress(task_id, "Creating Report", 0.8, "Compiling forecast report")
        .await;
    tokio::time::sleep(STEP_PACING).await;
    let file_url = report_url(task_id, "forecast");
    ctx.store.set_result_url(task_id, &file_url).await?;
    ctx.store.complete_step(task_id, "Creating Report").await?;
    ctx.store.set_status(task_id, TaskStatus::Completed).await?;

    ctx.emitter
        .send_complete(
            task_id,
            serde_json::json!({
                "file_url": file_url,
                "horizon": horizon,
                "forecasts": forecasts,
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

    #[tokio::test(start_paused = true)]
    async fn forecasts_each_pair_and_reports() {
        let (ctx, emitter, store) = test_context();
        seed_task(&store, TaskKind::Forecast, "task-fc").await;

        let args = TaskArgs {
            task_id: "task-fc".to_string(),
            user_id: None,
            currency_pairs: vec!["EUR/USD".to_string(), "gbpusd".to_string()],
            user_limits: None,
            include_forecast: false,
            forecast_horizon_hours: Some(168),
            analysis_period_hours: None,
        };
        run(&ctx, &args).await.unwrap();

        let frames = emitter.frames.lock().unwrap().clone();
        let infos: Vec<_> = frames
            .iter()
            .filter(|f| f.kind == UpdateType::Info)
            .collect();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].data.as_ref().unwrap()["horizon"], "1w");
        assert_eq!(infos[1].data.as_ref().unwrap()["pair"], "GBP/USD");

        let last = frames.last().unwrap();
        assert!(last.data.as_ref().unwrap()["file_url"]
            .as_str()
            .unwrap()
            .ends_with("_forecast.pdf"));

        let record = store.get("task-fc").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.current_step, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_pairs_warn_and_an_empty_set_fails() {
        let (ctx, emitter, store) = test_context();
        seed_task(&store, TaskKind::Forecast, "task-fc").await;

        let args = TaskArgs {
            task_id: "task-fc".to_string(),
            user_id: None,
            currency_pairs: vec!["XXX/YYY".to_string()],
            user_limits: None,
            include_forecast: false,
            forecast_horizon_hours: None,
            analysis_period_hours: None,
        };
        let error = run(&ctx, &args).await.unwrap_err();
        assert!(error.to_string().contains("no requested pair"));

        let frames = emitter.frames.lock().unwrap().clone();
        assert!(frames.iter().any(|f| f.kind == UpdateType::Warning));
    }
}
