//! Alert Processor: one consumer of `alerts`, three
//! cooperative loops sharing an in-memory group map — consume, flush and
//! suppression-sweep. The flush loop generalizes a batch-size-or-timeout
//! flush into a grouping-window flush with severity-aware summary
//! construction.

use crate::dispatch::{self, Dispatcher};
use analyzer_bus::BusClient;
use analyzer_common::config::Config;
use analyzer_common::error::Result;
use analyzer_common::types::{Alert, DlqRecord, Severity};
use analyzer_store::StateStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A pending group of alerts sharing `(service, metric_type)`, keyed in
/// the processor's in-memory map by group key.
pub struct AlertGroup {
    alerts: Vec<Alert>,
    count: usize,
    severity: Severity,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl AlertGroup {
    fn new(alert: &Alert) -> Self {
        Self {
            alerts: vec![alert.clone()],
            count: 1,
            severity: alert.severity,
            first_seen: alert.timestamp,
            last_seen: alert.timestamp,
        }
    }

    /// Adds an alert, capping stored alerts at `max_alerts_per_group`
    /// while `count` keeps incrementing beyond the cap; severity upgrades
    /// monotonically.
    fn add(&mut self, alert: Alert, max_alerts_per_group: usize) {
        self.count += 1;
        self.last_seen = alert.timestamp;
        if self.severity < alert.severity {
            self.severity = alert.severity;
        }
        if self.alerts.len() < max_alerts_per_group {
            self.alerts.push(alert);
        }
    }
}

type GroupMap = Mutex<HashMap<String, AlertGroup>>;

/// Drops `alert` if a live suppression key exists for its
/// `(service, metric_type, severity)`.
async fn maybe_suppress(store: &StateStore, alert: &Alert) -> Result<bool> {
    let key = format!(
        "suppression:{}",
        Alert::suppression_key(&alert.service, alert.metric_type, alert.severity)
    );
    store.ttl_exists(&key)
}

async fn add_to_group(groups: &GroupMap, alert: Alert, max_alerts_per_group: usize) {
    let key = Alert::group_key(&alert.service, alert.metric_type);
    let mut guard = groups.lock().await;
    guard
        .entry(key)
        .and_modify(|g| g.add(alert.clone(), max_alerts_per_group))
        .or_insert_with(|| AlertGroup::new(&alert));
}

/// Consume loop: fetch -> deserialize -> maybeSuppress -> addToGroup ->
/// commit offset. Offsets are committed here, right after addToGroup,
/// not after dispatch.
pub async fn run_consume_loop(
    store: Arc<StateStore>,
    bus: Arc<BusClient>,
    groups: Arc<GroupMap>,
    cfg: Arc<Config>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut consumer = bus
        .consumer(&cfg.bus.alerts_topic, &cfg.bus.alert_processor_consumer_group)
        .await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("alert processor consume loop shutting down");
                return Ok(());
            }
            fetched = consumer.next() => {
                let message = match fetched {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        warn!("alerts consumer stream ended, reconnecting");
                        consumer = bus
                            .consumer(&cfg.bus.alerts_topic, &cfg.bus.alert_processor_consumer_group)
                            .await?;
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "alerts consumer stream error");
                        continue;
                    }
                };

                match serde_json::from_slice::<Alert>(message.payload()) {
                    Ok(alert) => {
                        match maybe_suppress(&store, &alert).await {
                            Ok(true) => {}
                            Ok(false) => {
                                add_to_group(&groups, alert, cfg.alert_engine.max_alerts_per_group).await;
                            }
                            Err(e) => error!(error = %e, "suppression check failed"),
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to decode alert, committing offset anyway"),
                }

                if let Err(e) = message.ack().await {
                    error!(error = %e, "failed to commit alert-processor offset");
                }
            }
        }
    }
}

fn build_summary(group_key: &str, group: &AlertGroup) -> Alert {
    if group.count == 1 {
        return group.alerts[0].clone();
    }
    let first = &group.alerts[0];
    let mut labels = first.labels.clone();
    labels.insert("group_id".to_string(), group_key.to_string());
    labels.insert("group_count".to_string(), group.count.to_string());
    labels.insert("first_seen".to_string(), group.first_seen.to_rfc3339());

    Alert {
        id: Uuid::new_v4().to_string(),
        alert_type: first.alert_type,
        severity: group.severity,
        service: first.service.clone(),
        metric_type: first.metric_type,
        title: format!("{} (+{} more)", first.title, group.count - 1),
        message: format!("{}\n\n--- {} similar alerts were grouped ---", first.message, group.count),
        current_value: first.current_value,
        threshold_or_reference: first.threshold_or_reference,
        timestamp: group.last_seen,
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
        resolved_at: None,
        labels,
        rule_id: first.rule_id.clone(),
        metric_id: None,
        trace_id: first.trace_id.clone(),
    }
}

/// Dispatches `summary` to every enabled dispatcher; DLQ-routes any that
/// exhaust their retries.
async fn dispatch_summary(
    summary: &Alert,
    dispatchers: &[Arc<dyn Dispatcher>],
    bus: &BusClient,
    cfg: &Config,
) -> Result<()> {
    let max_retries = cfg.alert_engine.max_retries;
    let retry_delay = Duration::from_millis(cfg.alert_engine.retry_delay_ms);

    for dispatcher in dispatchers {
        if let Err(e) = dispatch::dispatch_with_retry(dispatcher.as_ref(), summary, max_retries, retry_delay).await {
            warn!(
                alert_id = %summary.id,
                dispatcher = dispatcher.name(),
                error = %e,
                "dispatch exhausted, routing to dead-letter queue"
            );
            let record = DlqRecord {
                alert: summary.clone(),
                dispatcher: dispatcher.name().to_string(),
                error: e.to_string(),
                timestamp: Utc::now(),
            };
            let payload = serde_json::to_vec(&record)?;
            if let Err(publish_err) = bus.producer().publish(&cfg.bus.alerts_dlq_topic, &summary.id, payload).await {
                error!(error = %publish_err, alert_id = %summary.id, "failed to publish dead-letter record");
            }
        }
    }
    Ok(())
}

/// Flush loop: every `grouping_window`, atomically swaps the group map
/// with a fresh one, dispatches one summary per non-empty group, then
/// sets the suppression key.
pub async fn run_flush_loop(
    store: Arc<StateStore>,
    bus: Arc<BusClient>,
    groups: Arc<GroupMap>,
    dispatchers: Vec<Arc<dyn Dispatcher>>,
    cfg: Arc<Config>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(cfg.alert_engine.grouping_window());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("alert processor flush loop shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                let snapshot = {
                    let mut guard = groups.lock().await;
                    std::mem::take(&mut *guard)
                };
                for (group_key, group) in snapshot {
                    let summary = build_summary(&group_key, &group);
                    if let Err(e) = store.insert_alert(
                        &summary,
                        Duration::from_secs(cfg.store.alert_journal_ttl_seconds),
                    ) {
                        error!(error = %e, group = %group_key, "failed to journal alert summary");
                    }
                    if let Err(e) = dispatch_summary(&summary, &dispatchers, &bus, &cfg).await {
                        error!(error = %e, group = %group_key, "failed to dispatch group summary");
                    }
                    let suppression_key = format!(
                        "suppression:{}",
                        Alert::suppression_key(&summary.service, summary.metric_type, summary.severity)
                    );
                    if let Err(e) = store.ttl_set(
                        &suppression_key,
                        Duration::from_secs(cfg.alert_engine.suppression_window_seconds),
                    ) {
                        error!(error = %e, "failed to set suppression key after flush");
                    }
                }
            }
        }
    }
}

/// Suppression sweep loop: every `suppression_sweep_interval`, drops
/// expired suppression entries.
pub async fn run_sweep_loop(store: Arc<StateStore>, cfg: Arc<Config>, shutdown: CancellationToken) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.alert_engine.suppression_sweep_interval_seconds));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("suppression sweep loop shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                match store.ttl_sweep_expired("suppression:") {
                    Ok(removed) if removed > 0 => info!(removed, "swept expired suppression entries"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "suppression sweep failed"),
                }
            }
        }
    }
}

pub fn new_group_map() -> Arc<GroupMap> {
    Arc::new(Mutex::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_common::types::{AlertType, MetricType};
    use std::collections::HashMap as StdHashMap;

    fn alert(service: &str, severity: Severity, ts: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            alert_type: AlertType::ThresholdViolation,
            severity,
            service: service.to_string(),
            metric_type: MetricType::LatencyP95,
            title: "latency spike".to_string(),
            message: "p95 over threshold".to_string(),
            current_value: 500.0,
            threshold_or_reference: 200.0,
            timestamp: ts,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            labels: StdHashMap::new(),
            rule_id: None,
            metric_id: None,
            trace_id: None,
        }
    }

    #[tokio::test]
    async fn grouping_caps_stored_alerts_but_not_count() {
        let groups = new_group_map();
        let base = Utc::now();
        for i in 0..5 {
            add_to_group(&groups, alert("orders", Severity::Warning, base + chrono::Duration::seconds(i)), 3).await;
        }
        let guard = groups.lock().await;
        let group = guard.get("orders:latency_p95").unwrap();
        assert_eq!(group.count, 5);
        assert_eq!(group.alerts.len(), 3);
    }

    #[tokio::test]
    async fn severity_upgrades_monotonically() {
        let groups = new_group_map();
        let base = Utc::now();
        add_to_group(&groups, alert("orders", Severity::Info, base), 10).await;
        add_to_group(&groups, alert("orders", Severity::Critical, base), 10).await;
        add_to_group(&groups, alert("orders", Severity::Warning, base), 10).await;
        let guard = groups.lock().await;
        assert_eq!(guard.get("orders:latency_p95").unwrap().severity, Severity::Critical);
    }

    #[test]
    fn summary_uses_single_alert_when_group_count_is_one() {
        let a = alert("orders", Severity::Warning, Utc::now());
        let group = AlertGroup::new(&a);
        let summary = build_summary("orders:latency_p95", &group);
        assert_eq!(summary.id, a.id);
    }

    #[test]
    fn summary_title_and_labels_reflect_group_count() {
        let base = Utc::now();
        let mut group = AlertGroup::new(&alert("orders", Severity::Warning, base));
        for i in 1..5 {
            group.add(alert("orders", Severity::Warning, base + chrono::Duration::seconds(i)), 10);
        }
        let summary = build_summary("orders:latency_p95", &group);
        assert!(summary.title.ends_with("(+4 more)"));
        assert_eq!(summary.labels.get("group_count"), Some(&"5".to_string()));
    }
}
