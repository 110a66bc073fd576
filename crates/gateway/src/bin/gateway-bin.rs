use analyzer_bus::BusClient;
use analyzer_common::config::Config;
use analyzer_common::logging;
use analyzer_common::shutdown::Shutdown;
use analyzer_store::StateStore;
use gateway::hub::Hub;
use gateway::{api, AppStateInner};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("gateway_bin=info,gateway=info,analyzer_store=info,analyzer_bus=info");

    let config_path = std::env::var("ANALYZER_CONFIG_PATH").ok();
    let config = Arc::new(Config::load(config_path.as_deref())?);
    info!(port = config.gateway.port, "starting gateway-bin");

    let store = Arc::new(StateStore::open(&config.store.path)?);

    let bus = Arc::new(BusClient::connect(&config.bus.url).await?);
    bus.ensure_stream(&config.bus.metrics_topic, Duration::from_secs(config.bus.stream_retention_seconds))
        .await?;
    bus.ensure_stream(&config.bus.alerts_topic, Duration::from_secs(config.bus.stream_retention_seconds))
        .await?;
    #[cfg(feature = "log-stream")]
    if config.gateway.enable_log_stream {
        bus.ensure_stream(&config.bus.logs_topic, Duration::from_secs(config.bus.stream_retention_seconds))
            .await?;
    }

    let hub = Hub::spawn(config.gateway.client_send_queue_capacity);

    let state = Arc::new(AppStateInner {
        store: store.clone(),
        bus: bus.clone(),
        config: config.clone(),
        hub: hub.clone(),
        started_at: std::time::Instant::now(),
    });

    let shutdown = Shutdown::new();
    shutdown.install_signal_handler();

    let mut tasks = JoinSet::new();

    {
        let hub = hub.clone();
        let bus = bus.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = gateway::hub::run_metrics_bridge(hub, bus, config, token).await {
                error!(error = %e, "metrics stream bridge exited with an error");
            }
        });
    }

    {
        let hub = hub.clone();
        let bus = bus.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = gateway::hub::run_alerts_bridge(hub, bus, config, token).await {
                error!(error = %e, "alert stream bridge exited with an error");
            }
        });
    }

    #[cfg(feature = "log-stream")]
    if config.gateway.enable_log_stream {
        let hub = hub.clone();
        let bus = bus.clone();
        let config = config.clone();
        let token = shutdown.token();
        tasks.spawn(async move {
            if let Err(e) = gateway::hub::run_logs_bridge(hub, bus, config, token).await {
                error!(error = %e, "log stream bridge exited with an error");
            }
        });
    }

    let app = api::create_router(state);
    let bind_addr = format!("{}:{}", config.gateway.bind_address, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "gateway listening");

    let server_token = shutdown.token();
    tasks.spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server exited with an error");
        }
    });

    shutdown.drain(tasks).await;
    store.flush().await?;
    info!("gateway-bin shut down cleanly");
    Ok(())
}
