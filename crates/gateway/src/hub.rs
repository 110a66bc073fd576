//! Gateway Stream Hub: a process-wide broadcast hub over
//! bounded per-client channels, plus the bus-to-hub bridge that turns
//! `service-metrics`/`alerts` bus traffic into broadcast frames.
//!
//! Built as the standard Tokio actor-over-mpsc pattern: a single task owns
//! the client set and processes register/unregister/broadcast commands
//! serially, so the set is never touched from more than one place at a
//! time.

use analyzer_bus::BusClient;
use analyzer_common::config::Config;
use analyzer_common::error::Result;
use analyzer_common::types::{Alert, MetricSample};
#[cfg(feature = "log-stream")]
use analyzer_common::types::ServiceLog;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server-to-client frame shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", content = "payload")]
pub enum Frame {
    Metric(MetricSample),
    Alert(Alert),
    #[cfg(feature = "log-stream")]
    Log(ServiceLog),
    Status(serde_json::Value),
    Pong,
    Error(String),
}

/// Client-to-server control message shape.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    #[allow(dead_code)]
    payload: serde_json::Value,
}

enum HubCommand {
    Register { id: Uuid, sender: mpsc::Sender<String> },
    Unregister { id: Uuid },
    Broadcast { frame: String },
}

/// Handle shared by every HTTP/WS handler and bus-bridge task; cheap to
/// clone (an `mpsc::Sender` over a shared channel).
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    client_queue_capacity: usize,
}

impl Hub {
    pub fn spawn(client_queue_capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(run_loop(rx));
        Arc::new(Self {
            commands: tx,
            client_queue_capacity,
        })
    }

    /// Registers a new client, returning its id, a sender it can use for
    /// direct replies (e.g. pong), and the receiver its write loop drains.
    async fn register(&self) -> (Uuid, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.client_queue_capacity);
        let _ = self.commands.send(HubCommand::Register { id, sender: tx.clone() }).await;
        (id, tx, rx)
    }

    async fn unregister(&self, id: Uuid) {
        let _ = self.commands.send(HubCommand::Unregister { id }).await;
    }

    pub async fn broadcast(&self, frame: &Frame) {
        match serde_json::to_string(frame) {
            Ok(json) => {
                let _ = self.commands.send(HubCommand::Broadcast { frame: json }).await;
            }
            Err(e) => warn!(error = %e, "failed to serialize stream frame"),
        }
    }
}

/// Single-reader run loop: every client-set mutation happens here, so no
/// lock is required.
async fn run_loop(mut commands: mpsc::Receiver<HubCommand>) {
    let mut clients: HashMap<Uuid, mpsc::Sender<String>> = HashMap::new();
    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, sender } => {
                clients.insert(id, sender);
                debug!(client_id = %id, total = clients.len(), "stream client registered");
            }
            HubCommand::Unregister { id } => {
                clients.remove(&id);
                debug!(client_id = %id, total = clients.len(), "stream client unregistered");
            }
            HubCommand::Broadcast { frame } => {
                let mut dropped = Vec::new();
                for (id, sender) in clients.iter() {
                    // Non-blocking enqueue; a full queue means a slow
                    // client, which we drop rather than let it
                    // back-pressure everyone else.
                    if sender.try_send(frame.clone()).is_err() {
                        dropped.push(*id);
                    }
                }
                for id in dropped {
                    clients.remove(&id);
                    warn!(client_id = %id, "dropped slow stream client on full send queue");
                }
            }
        }
    }
}

/// Drives one accepted WebSocket connection: a read half decoding control
/// messages, a write half draining the client's broadcast queue and
/// sending periodic pings.
pub async fn handle_socket(
    socket: WebSocket,
    hub: Arc<Hub>,
    ping_interval: Duration,
    pong_timeout: Duration,
    max_message_bytes: usize,
    shutdown: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let (client_id, client_tx, mut client_rx) = hub.register().await;
    info!(client_id = %client_id, "stream client connected");

    let mut write_task = tokio::spawn(async move {
        let mut ping_timer = tokio::time::interval(ping_interval);
        ping_timer.tick().await; // first tick fires immediately; discard it
        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                frame = client_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if sink.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let reply_tx = client_tx.clone();
    let mut read_task = tokio::spawn(async move {
        loop {
            let next = tokio::time::timeout(pong_timeout, stream.next()).await;
            let message = match next {
                Ok(Some(Ok(message))) => message,
                _ => break, // closed, errored, or pong deadline exceeded
            };
            match message {
                Message::Text(text) => handle_control_text(&text, max_message_bytes, &reply_tx).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
        _ = shutdown.cancelled() => {
            write_task.abort();
            read_task.abort();
        }
    }

    hub.unregister(client_id).await;
    info!(client_id = %client_id, "stream client disconnected");
}

async fn handle_control_text(text: &str, max_message_bytes: usize, reply_tx: &mpsc::Sender<String>) {
    if text.len() > max_message_bytes {
        send_frame(reply_tx, &Frame::Error("message exceeds maximum size".into())).await;
        return;
    }
    match serde_json::from_str::<ControlMessage>(text) {
        Ok(control) if control.kind == "ping" => send_frame(reply_tx, &Frame::Pong).await,
        Ok(control) if control.kind == "subscribe" || control.kind == "unsubscribe" => {
            debug!(kind = %control.kind, "stream client control message");
        }
        Ok(control) => warn!(kind = %control.kind, "unknown stream control message type"),
        Err(_) => send_frame(reply_tx, &Frame::Error("invalid control message".into())).await,
    }
}

async fn send_frame(tx: &mpsc::Sender<String>, frame: &Frame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = tx.send(json).await;
    }
}

/// Bridges `service-metrics` bus traffic onto the hub. Offsets commit unconditionally after fetch: streaming is
/// fire-and-forget, no re-delivery is needed for a live broadcast.
pub async fn run_metrics_bridge(hub: Arc<Hub>, bus: Arc<BusClient>, cfg: Arc<Config>, shutdown: CancellationToken) -> Result<()> {
    let mut consumer = bus.consumer(&cfg.bus.metrics_topic, &cfg.bus.gateway_consumer_group).await?;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = consumer.next() => {
                match next? {
                    None => {
                        consumer = bus.consumer(&cfg.bus.metrics_topic, &cfg.bus.gateway_consumer_group).await?;
                    }
                    Some(message) => {
                        match serde_json::from_slice::<MetricSample>(message.payload()) {
                            Ok(sample) => hub.broadcast(&Frame::Metric(sample)).await,
                            Err(e) => warn!(error = %e, "failed to decode metric stream frame"),
                        }
                        message.ack().await?;
                    }
                }
            }
        }
    }
}

/// Bridges `alerts` bus traffic onto the hub.
pub async fn run_alerts_bridge(hub: Arc<Hub>, bus: Arc<BusClient>, cfg: Arc<Config>, shutdown: CancellationToken) -> Result<()> {
    let mut consumer = bus.consumer(&cfg.bus.alerts_topic, &cfg.bus.gateway_consumer_group).await?;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = consumer.next() => {
                match next? {
                    None => {
                        consumer = bus.consumer(&cfg.bus.alerts_topic, &cfg.bus.gateway_consumer_group).await?;
                    }
                    Some(message) => {
                        match serde_json::from_slice::<Alert>(message.payload()) {
                            Ok(alert) => hub.broadcast(&Frame::Alert(alert)).await,
                            Err(e) => warn!(error = %e, "failed to decode alert stream frame"),
                        }
                        message.ack().await?;
                    }
                }
            }
        }
    }
}

/// Bridges `service-logs` bus traffic onto the hub; only wired up when the
/// `log-stream` feature is enabled.
#[cfg(feature = "log-stream")]
pub async fn run_logs_bridge(hub: Arc<Hub>, bus: Arc<BusClient>, cfg: Arc<Config>, shutdown: CancellationToken) -> Result<()> {
    let mut consumer = bus.consumer(&cfg.bus.logs_topic, &cfg.bus.gateway_consumer_group).await?;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = consumer.next() => {
                match next? {
                    None => {
                        consumer = bus.consumer(&cfg.bus.logs_topic, &cfg.bus.gateway_consumer_group).await?;
                    }
                    Some(message) => {
                        match serde_json::from_slice::<ServiceLog>(message.payload()) {
                            Ok(log) => hub.broadcast(&Frame::Log(log)).await,
                            Err(e) => warn!(error = %e, "failed to decode log stream frame"),
                        }
                        message.ack().await?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_drops_client_once_its_queue_is_full() {
        let hub = {
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(run_loop(rx));
            Hub {
                commands: tx,
                client_queue_capacity: 1,
            }
        };

        let (_id, client_tx, mut client_rx) = hub.register().await;
        drop(client_tx); // only the hub's own clone should matter for delivery

        hub.broadcast(&Frame::Status(serde_json::json!({"n": 1}))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The one-slot queue is now full; this broadcast finds it full and
        // drops the client from the hub's set.
        hub.broadcast(&Frame::Status(serde_json::json!({"n": 2}))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(client_rx.recv().await.is_some(), "first frame should still be buffered");

        // A further broadcast should reach nobody: the client was removed.
        hub.broadcast(&Frame::Status(serde_json::json!({"n": 3}))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client_rx.try_recv().is_err());
    }
}
