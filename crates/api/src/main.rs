use anyhow::Context;
use api::{App, Args, Config};
use clap::Parser;

fn main() -> anyhow::Result<()> {
    // Reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let config = Config::from_args(Args::parse());
    // Fail fast on invalid production configuration, before binding.
    config.validate()?;
    tracing::info!(
        port = config.api_port,
        debug = config.debug,
        queue_enabled = config.task_queue_enabled,
        stream_enabled = config.forex_stream_enabled,
        "starting copilot backend"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async_main(config));
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .context("failed to bind server port")?;

    let app = App::new(config)?;
    app.start_background().await;

    let router = api::build_router(app.clone());
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    app.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
}
