use analyzer_bus::BusClient;
use analyzer_common::config::Config;
use analyzer_common::logging;
use analyzer_common::shutdown::Shutdown;
use analyzer_store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("analyzer_bin=info,analyzer_engine=info,analyzer_store=info,analyzer_bus=info");

    let config_path = std::env::var("ANALYZER_CONFIG_PATH").ok();
    let config = Arc::new(Config::load(config_path.as_deref())?);
    info!(
        analysis_interval_seconds = config.analyzer.analysis_interval_seconds,
        "starting analyzer-bin"
    );

    let store = Arc::new(StateStore::open(&config.store.path)?);

    let bus = Arc::new(BusClient::connect(&config.bus.url).await?);
    bus.ensure_stream(&config.bus.metrics_topic, Duration::from_secs(config.bus.stream_retention_seconds))
        .await?;
    bus.ensure_stream(&config.bus.alerts_topic, Duration::from_secs(config.bus.stream_retention_seconds))
        .await?;

    let shutdown = Shutdown::new();
    shutdown.install_signal_handler();

    let mut tasks = JoinSet::new();

    {
        let store = store.clone();
        let bus = bus.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = analyzer_engine::ingest::run(store, bus, config, token).await {
                error!(error = %e, "ingest consumer exited with an error");
            }
        });
    }

    {
        let store = store.clone();
        let producer = bus.producer();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = analyzer_engine::analyze::run(store, producer, config, token).await {
                error!(error = %e, "analyzer tick loop exited with an error");
            }
        });
    }

    {
        let store = store.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = analyzer_engine::analyze::run_cleanup(store, config, token).await {
                error!(error = %e, "window cleanup loop exited with an error");
            }
        });
    }

    shutdown.drain(tasks).await;
    store.flush().await?;
    info!("analyzer-bin shut down cleanly");
    Ok(())
}
