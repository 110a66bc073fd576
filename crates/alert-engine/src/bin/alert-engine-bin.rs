use alert_engine::dispatch::build_dispatch_set;
use alert_engine::process::{new_group_map, run_consume_loop, run_flush_loop, run_sweep_loop};
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
    logging::init("alert_engine_bin=info,alert_engine=info,analyzer_store=info,analyzer_bus=info");

    let config_path = std::env::var("ANALYZER_CONFIG_PATH").ok();
    let config = Arc::new(Config::load(config_path.as_deref())?);
    info!(
        grouping_window_seconds = config.alert_engine.grouping_window_seconds,
        "starting alert-engine-bin"
    );

    let store = Arc::new(StateStore::open(&config.store.path)?);

    let bus = Arc::new(BusClient::connect(&config.bus.url).await?);
    bus.ensure_stream(&config.bus.alerts_topic, Duration::from_secs(config.bus.stream_retention_seconds))
        .await?;
    bus.ensure_stream(&config.bus.alerts_dlq_topic, Duration::from_secs(config.bus.stream_retention_seconds))
        .await?;

    let dispatchers = build_dispatch_set(&config.dispatchers);
    info!(count = dispatchers.len(), "enabled dispatchers");

    let groups = new_group_map();
    let shutdown = Shutdown::new();
    shutdown.install_signal_handler();

    let mut tasks = JoinSet::new();

    {
        let store = store.clone();
        let bus = bus.clone();
        let groups = groups.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = run_consume_loop(store, bus, groups, config, token).await {
                error!(error = %e, "alert consume loop exited with an error");
            }
        });
    }

    {
        let store = store.clone();
        let bus = bus.clone();
        let groups = groups.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = run_flush_loop(store, bus, groups, dispatchers, config, token).await {
                error!(error = %e, "alert flush loop exited with an error");
            }
        });
    }

    {
        let store = store.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = run_sweep_loop(store, config, token).await {
                error!(error = %e, "suppression sweep loop exited with an error");
            }
        });
    }

    shutdown.drain(tasks).await;
    store.flush().await?;
    info!("alert-engine-bin shut down cleanly");
    Ok(())
}
