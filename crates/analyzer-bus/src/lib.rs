//! Message bus client.
//!
//! Topics are NATS JetStream streams; a "consumer group" is a durable pull
//! consumer on that stream, giving the `service-metrics` / `service-logs` /
//! `alerts` / `alerts-dlq` topics at-least-once delivery with a committed
//! offset, via `async-nats`.

pub mod consumer;
pub mod producer;

use analyzer_common::error::{Error, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use std::time::Duration;

pub use consumer::{BusConsumer, BusMessage};
pub use producer::BusProducer;

/// One entry per topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    ServiceMetrics,
    ServiceLogs,
    Alerts,
    AlertsDlq,
}

impl Topic {
    pub fn subject(self, name: &str) -> &str {
        let _ = self;
        name
    }
}

/// Connects to the bus and exposes stream-scoped producer/consumer
/// handles. Created once per process and shared (cheap to clone: an
/// `async_nats::Client` is already a handle over a shared connection).
#[derive(Clone)]
pub struct BusClient {
    pub(crate) jetstream: jetstream::Context,
}

impl BusClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| Error::Bus(format!("failed to connect to bus at {url}: {e}")))?;
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    /// Ensures a stream exists for `topic`, with the configured retention
    /// window. Producers and consumers both call this idempotently before
    /// their first use of a topic.
    pub async fn ensure_stream(&self, topic_name: &str, retention: Duration) -> Result<()> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: topic_name.to_string(),
                subjects: vec![topic_name.to_string()],
                max_age: retention,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Bus(format!("failed to ensure stream {topic_name}: {e}")))?;
        Ok(())
    }

    pub fn producer(&self) -> BusProducer {
        BusProducer::new(self.jetstream.clone())
    }

    pub async fn consumer(&self, topic_name: &str, group: &str) -> Result<BusConsumer> {
        BusConsumer::new(self.jetstream.clone(), topic_name, group).await
    }
}
