//! Bus consumer: a durable pull consumer per (topic, consumer group),
//! giving each group its own committed offset.

use analyzer_common::error::{Error, Result};
use async_nats::jetstream::{self, consumer::PullConsumer, message::Message};
use futures_util::StreamExt;

/// One fetched message, not yet committed. The caller decides whether to
/// `ack()` (commit) or let it fall through to redelivery — on a decode
/// failure, callers still `ack()` and log a warning rather than block
/// redelivery on a message that will never decode.
pub struct BusMessage {
    inner: Message,
}

impl BusMessage {
    pub fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    /// Commits the offset for this message.
    pub async fn ack(&self) -> Result<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| Error::Bus(format!("ack failed: {e}")))
    }
}

pub struct BusConsumer {
    stream: std::pin::Pin<Box<dyn futures_util::Stream<Item = std::result::Result<Message, async_nats::jetstream::consumer::pull::MessagesError>> + Send>>,
}

impl BusConsumer {
    pub(crate) async fn new(jetstream: jetstream::Context, topic_name: &str, group: &str) -> Result<Self> {
        let stream = jetstream
            .get_stream(topic_name)
            .await
            .map_err(|e| Error::Bus(format!("stream {topic_name} not found: {e}")))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                group,
                jetstream::consumer::pull::Config {
                    durable_name: Some(group.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    deliver_policy: jetstream::consumer::DeliverPolicy::New,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Bus(format!("failed to create consumer {group} on {topic_name}: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Bus(format!("failed to open message stream: {e}")))?;

        Ok(Self {
            stream: Box::pin(messages),
        })
    }

    /// Awaits the next message, or `None` if the underlying stream ended
    /// (connection closed). Returning `None` is not itself an error — the
    /// caller's consume loop treats it as a signal to reconnect or exit on
    /// shutdown.
    pub async fn next(&mut self) -> Result<Option<BusMessage>> {
        match self.stream.next().await {
            Some(Ok(message)) => Ok(Some(BusMessage { inner: message })),
            Some(Err(e)) => Err(Error::Bus(format!("consumer stream error: {e}"))),
            None => Ok(None),
        }
    }
}
