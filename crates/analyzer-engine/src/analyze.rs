//! Analyzer Engine tick and Alert Producer.

use analyzer_bus::BusProducer;
use analyzer_common::config::Config;
use analyzer_common::error::Result;
use analyzer_common::retry::RetryConfig;
use analyzer_common::types::{Alert, AlertType, MetricSample, MetricType, Severity, ThresholdRule};
use analyzer_store::StateStore;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn run(
    store: Arc<StateStore>,
    producer: BusProducer,
    cfg: Arc<Config>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(cfg.analyzer.analysis_interval());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("analyzer tick loop shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                if let Err(e) = tick(&store, &producer, &cfg).await {
                    error!(error = %e, "analyzer tick failed");
                }
            }
        }
    }
}

/// Periodic retention sweep: deletes window samples older than
/// `retention_seconds`, leaving "latest" pointer keys untouched.
pub async fn run_cleanup(store: Arc<StateStore>, cfg: Arc<Config>, shutdown: CancellationToken) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.store.cleanup_interval_seconds));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("window cleanup loop shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                match store.cleanup_expired_samples(Duration::from_secs(cfg.store.retention_seconds)) {
                    Ok(removed) if removed > 0 => info!(removed, "swept expired metric samples"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "window cleanup failed"),
                }
            }
        }
    }
}

/// One invocation of the periodic analysis tick.
async fn tick(store: &StateStore, producer: &BusProducer, cfg: &Config) -> Result<()> {
    let rules = store.list_enabled_rules()?;
    let services = determine_services(&rules, &cfg.analyzer.known_services);

    for service in services {
        let window = store.range_samples_any_type(&service, cfg.analyzer.sliding_window())?;
        if window.is_empty() {
            continue;
        }
        // `range_samples_any_type` returns ascending by timestamp.
        let latest = window.last().expect("non-empty window has a last element");

        for rule in rules.iter().filter(|r| r.enabled && r.matches_service(&service)) {
            let Some(value) = rule.metric_type.project(latest) else {
                continue;
            };
            if rule.operator.evaluate(value, rule.threshold) {
                generate_alert(
                    store,
                    producer,
                    cfg,
                    &service,
                    rule.metric_type,
                    rule.severity,
                    AlertType::ThresholdViolation,
                    value,
                    rule.threshold,
                    Some(rule.id.clone()),
                )
                .await?;
            }
        }

        for metric_type in MetricType::deviation_candidates() {
            if let Some((z, baseline_mean, latest_value)) =
                deviation_score(&window, metric_type, cfg.analyzer.min_samples_for_deviation)
            {
                if z > cfg.analyzer.deviation_multiplier {
                    let severity = if z > cfg.analyzer.deviation_multiplier * 2.0 {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    generate_alert(
                        store,
                        producer,
                        cfg,
                        &service,
                        metric_type,
                        severity,
                        AlertType::DeviationDetected,
                        latest_value,
                        baseline_mean,
                        None,
                    )
                    .await?;
                }
            }
        }
    }
    Ok(())
}

/// Services to analyze: every known service from config, plus every
/// non-wildcard service a rule targets — a rule with an empty `service`
/// (wildcard) doesn't by itself enumerate a service to scan, so the
/// deviation test and wildcard rules both rely on `known_services` being
/// populated.
fn determine_services(rules: &[ThresholdRule], known_services: &[String]) -> Vec<String> {
    let mut set: BTreeSet<String> = known_services.iter().cloned().collect();
    for rule in rules {
        if rule.enabled && !rule.service.is_empty() {
            set.insert(rule.service.clone());
        }
    }
    set.into_iter().collect()
}

/// Computes the deviation z-score for `metric_type` against the window,
/// returning `(z, baseline_mean, latest_value)`. The reported reference
/// is the pre-spike mean (history excluding the latest sample), so it
/// reads as "what this service looked like before the spike" rather than
/// a mean pulled toward the spike itself. The stddev driving the z-gate
/// is computed over the *full* window including the latest sample: a
/// perfectly flat baseline has zero variance on its own, and gating on
/// the history-only stddev would mean a spike against a flat baseline
/// (stddev == 0) could never fire. Including the spike keeps σ>0 in that
/// case while still scoring against the pre-spike mean.
fn deviation_score(
    window: &[MetricSample],
    metric_type: MetricType,
    min_samples: usize,
) -> Option<(f64, f64, f64)> {
    if window.len() < min_samples {
        return None;
    }
    let latest = window.last()?;
    let latest_value = metric_type.project(latest)?;

    let history: Vec<f64> = window[..window.len() - 1]
        .iter()
        .filter_map(|s| metric_type.project(s))
        .collect();
    if history.is_empty() {
        return None;
    }
    let full: Vec<f64> = window.iter().filter_map(|s| metric_type.project(s)).collect();

    let mean = history.iter().sum::<f64>() / history.len() as f64;
    let full_mean = full.iter().sum::<f64>() / full.len() as f64;
    let variance = full.iter().map(|v| (v - full_mean).powi(2)).sum::<f64>() / full.len() as f64;
    let stddev = variance.sqrt();
    if stddev <= 0.0 {
        return None;
    }

    let z = (latest_value - mean).abs() / stddev;
    Some((z, mean, latest_value))
}

/// generateAlert: dedup check-and-set, cooldown check, build
/// and publish, set cooldown on publish success.
#[allow(clippy::too_many_arguments)]
async fn generate_alert(
    store: &StateStore,
    producer: &BusProducer,
    cfg: &Config,
    service: &str,
    metric_type: MetricType,
    severity: Severity,
    alert_type: AlertType,
    current_value: f64,
    reference: f64,
    rule_id: Option<String>,
) -> Result<()> {
    let dedup_key = Alert::dedup_key(service, metric_type, alert_type);
    let dedup_store_key = format!("alert:sent:{dedup_key}");
    if !store.try_set_if_absent(&dedup_store_key, Duration::from_secs(cfg.analyzer.dedup_ttl_seconds))? {
        return Ok(());
    }

    let cooldown_key = Alert::cooldown_key(service, metric_type);
    let cooldown_store_key = format!("cooldown:{cooldown_key}");
    if store.ttl_exists(&cooldown_store_key)? {
        return Ok(());
    }

    let (title, message) = describe(alert_type, service, metric_type, current_value, reference);
    let mut labels = HashMap::new();
    labels.insert("alert_type".to_string(), alert_type.as_str().to_string());

    let alert = Alert {
        id: Uuid::new_v4().to_string(),
        alert_type,
        severity,
        service: service.to_string(),
        metric_type,
        title,
        message,
        current_value,
        threshold_or_reference: reference,
        timestamp: Utc::now(),
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
        resolved_at: None,
        labels,
        rule_id,
        metric_id: None,
        trace_id: None,
    };

    let retry_cfg = RetryConfig::new(
        cfg.analyzer.max_retries,
        Duration::from_millis(cfg.analyzer.retry_base_delay_ms),
        Duration::from_millis(cfg.analyzer.retry_max_backoff_ms),
    );
    let payload = serde_json::to_vec(&alert)?;

    match producer
        .publish_with_retry(&cfg.bus.alerts_topic, &alert.id, payload, &retry_cfg)
        .await
    {
        Ok(()) => {
            store.ttl_set(&cooldown_store_key, Duration::from_secs(cfg.analyzer.default_cooldown_seconds))?;
        }
        Err(e) => {
            warn!(error = %e, alert_id = %alert.id, "alert publish failed; cooldown not set, retry allowed next tick");
        }
    }
    Ok(())
}

fn describe(alert_type: AlertType, service: &str, metric_type: MetricType, value: f64, reference: f64) -> (String, String) {
    match alert_type {
        AlertType::ThresholdViolation => (
            format!("{service}: {metric_type} threshold violation"),
            format!("{metric_type} is {value:.2}, threshold is {reference:.2}"),
        ),
        AlertType::DeviationDetected => (
            format!("{service}: {metric_type} deviation detected"),
            format!("{metric_type} is {value:.2}, deviating from a baseline mean of {reference:.2}"),
        ),
        _ => (
            format!("{service}: {metric_type} alert"),
            format!("{metric_type} is {value:.2} (reference {reference:.2})"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_common::types::Operator;
    use std::collections::HashMap as StdHashMap;

    fn sample(service: &str, cpu: f64, ts: chrono::DateTime<Utc>) -> MetricSample {
        MetricSample {
            id: Uuid::new_v4().to_string(),
            service: service.to_string(),
            metric_type: MetricType::Cpu,
            value: cpu,
            unit: "percent".to_string(),
            timestamp: ts,
            labels: StdHashMap::new(),
            trace_id: None,
            span_id: None,
            cpu_usage: Some(cpu),
            memory_usage: None,
            latency_p50: None,
            latency_p95: None,
            latency_p99: None,
            error_rate: None,
            request_count: None,
        }
    }

    #[test]
    fn determine_services_unions_known_and_rule_targeted() {
        let rules = vec![ThresholdRule {
            id: "r1".into(),
            name: "n".into(),
            description: String::new(),
            service: "orders".into(),
            metric_type: MetricType::Cpu,
            operator: Operator::Gt,
            threshold: 80.0,
            severity: Severity::Critical,
            window_seconds: 300,
            cooldown_seconds: 300,
            enabled: true,
            notify_flags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }];
        let services = determine_services(&rules, &["auth".to_string()]);
        assert_eq!(services, vec!["auth".to_string(), "orders".to_string()]);
    }

    #[test]
    fn deviation_score_flags_a_spike_against_jittered_baseline() {
        let base = Utc::now();
        let mut window = Vec::new();
        let jitter = [19.8, 20.1, 19.9, 20.2, 19.7, 20.0, 20.3, 19.6, 20.1, 19.9, 20.0, 19.8, 20.2, 19.9, 20.0];
        for (i, v) in jitter.iter().enumerate() {
            window.push(sample("auth", *v, base + chrono::Duration::seconds(i as i64)));
        }
        window.push(sample("auth", 90.0, base + chrono::Duration::seconds(20)));

        let (z, mean, latest) = deviation_score(&window, MetricType::Cpu, 10).unwrap();
        assert!(z > 2.0, "expected a clear deviation, got z={z}");
        assert!((mean - 20.0).abs() < 0.5, "baseline mean should track pre-spike values, got {mean}");
        assert_eq!(latest, 90.0);
    }

    #[test]
    fn deviation_score_flags_a_spike_against_a_perfectly_flat_baseline() {
        let base = Utc::now();
        let mut window = Vec::new();
        for i in 0..15 {
            window.push(sample("auth", 20.0, base + chrono::Duration::seconds(i)));
        }
        window.push(sample("auth", 90.0, base + chrono::Duration::seconds(20)));

        let (z, mean, latest) = deviation_score(&window, MetricType::Cpu, 10).unwrap();
        assert!(z > 2.0, "a zero-variance baseline must not suppress the spike, got z={z}");
        assert!((mean - 20.0).abs() < 0.1, "baseline mean should be the pre-spike mean, got {mean}");
        assert_eq!(latest, 90.0);
    }

    #[test]
    fn deviation_score_requires_minimum_samples() {
        let base = Utc::now();
        let window: Vec<_> = (0..5)
            .map(|i| sample("auth", 20.0 + i as f64, base + chrono::Duration::seconds(i)))
            .collect();
        assert!(deviation_score(&window, MetricType::Cpu, 10).is_none());
    }
}
