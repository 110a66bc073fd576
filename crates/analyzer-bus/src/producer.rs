//! Bus producer: appends a message to a topic, keyed by entity id as
//! bytes.

use analyzer_common::error::{Error, Result};
use analyzer_common::retry::{retry_with_backoff, RetryConfig};
use async_nats::jetstream;
use async_nats::HeaderMap;

const PARTITION_KEY_HEADER: &str = "Nats-Msg-Id";

#[derive(Clone)]
pub struct BusProducer {
    jetstream: jetstream::Context,
}

impl BusProducer {
    pub(crate) fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }

    /// Publishes once. `key` becomes the dedup/partition header so
    /// redelivery of the same entity id is naturally idempotent on the
    /// bus side too (defense in depth alongside the store-side dedup).
    pub async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(PARTITION_KEY_HEADER, key);

        let ack = self
            .jetstream
            .publish_with_headers(topic.to_string(), headers, payload.into())
            .await
            .map_err(|e| Error::Bus(format!("publish to {topic} failed: {e}")))?;
        ack.await
            .map_err(|e| Error::Bus(format!("publish to {topic} not acked: {e}")))?;
        Ok(())
    }

    /// Publishes with exponential backoff: retries up to
    /// `config.max_attempts`, doubling each delay and capping at
    /// `config.max_delay`; returns the error to the caller only once
    /// attempts are exhausted.
    pub async fn publish_with_retry(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        config: &RetryConfig,
    ) -> Result<()> {
        retry_with_backoff(config, || {
            let payload = payload.clone();
            async move { self.publish(topic, key, payload).await }
        })
        .await
    }
}
