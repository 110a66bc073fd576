//! Ingest Consumer: decode each `service-metrics` message and
//! append it to the metric window; commit offset after append so a crash
//! mid-append simply redelivers (idempotent, see `analyzer_store::window`).

use analyzer_bus::BusClient;
use analyzer_common::config::Config;
use analyzer_common::error::Result;
use analyzer_common::types::MetricSample;
use analyzer_store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run(
    store: Arc<StateStore>,
    bus: Arc<BusClient>,
    cfg: Arc<Config>,
    shutdown: CancellationToken,
) -> Result<()> {
    let latest_ttl = Duration::from_secs(cfg.store.latest_pointer_ttl_seconds);
    let mut consumer = bus
        .consumer(&cfg.bus.metrics_topic, &cfg.bus.ingest_consumer_group)
        .await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("ingest consumer shutting down");
                return Ok(());
            }
            fetched = consumer.next() => {
                let message = match fetched {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        warn!("metrics consumer stream ended, reconnecting");
                        consumer = bus
                            .consumer(&cfg.bus.metrics_topic, &cfg.bus.ingest_consumer_group)
                            .await?;
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "metrics consumer stream error");
                        continue;
                    }
                };

                match serde_json::from_slice::<MetricSample>(message.payload()) {
                    Ok(sample) => {
                        if let Err(e) = store.append_sample(&sample, latest_ttl) {
                            error!(error = %e, service = %sample.service, "failed to append metric sample");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to decode metric sample, committing offset anyway");
                    }
                }

                if let Err(e) = message.ack().await {
                    error!(error = %e, "failed to commit ingest offset");
                }
            }
        }
    }
}
