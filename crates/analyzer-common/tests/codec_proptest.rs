//! Round-trip codec property for MetricSample, Alert and ThresholdRule:
//! `decode(encode(x)) == x` for every generated value.

use analyzer_common::types::{
    Alert, AlertType, MetricSample, MetricType, Operator, Severity, ThresholdRule,
};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;

fn metric_type_strategy() -> impl Strategy<Value = MetricType> {
    prop_oneof![
        Just(MetricType::Cpu),
        Just(MetricType::Memory),
        Just(MetricType::Latency),
        Just(MetricType::LatencyP95),
        Just(MetricType::LatencyP99),
        Just(MetricType::Error),
        Just(MetricType::ErrorRate),
        Just(MetricType::Status),
        Just(MetricType::RequestRate),
    ]
}

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Info),
        Just(Severity::Warning),
        Just(Severity::Critical),
    ]
}

fn operator_strategy() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Gt),
        Just(Operator::Lt),
        Just(Operator::Ge),
        Just(Operator::Le),
        Just(Operator::Eq),
        Just(Operator::Ne),
    ]
}

fn alert_type_strategy() -> impl Strategy<Value = AlertType> {
    prop_oneof![
        Just(AlertType::ThresholdViolation),
        Just(AlertType::DeviationDetected),
        Just(AlertType::ErrorBurst),
        Just(AlertType::LatencySpike),
        Just(AlertType::MovingAvgAnomaly),
    ]
}

fn timestamp_strategy() -> impl Strategy<Value = chrono::DateTime<Utc>> {
    (0i64..2_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap())
}

fn metric_sample_strategy() -> impl Strategy<Value = MetricSample> {
    (
        "[a-z0-9-]{1,12}",
        "[a-z]{1,10}",
        metric_type_strategy(),
        any::<f64>().prop_filter("finite", |v| v.is_finite()),
        "[a-z%]{1,8}",
        timestamp_strategy(),
        proptest::option::of(any::<f64>().prop_filter("finite", |v| v.is_finite())),
    )
        .prop_map(|(id, service, metric_type, value, unit, timestamp, cpu_usage)| MetricSample {
            id,
            service,
            metric_type,
            value,
            unit,
            timestamp,
            labels: HashMap::new(),
            trace_id: None,
            span_id: None,
            cpu_usage,
            memory_usage: None,
            latency_p50: None,
            latency_p95: None,
            latency_p99: None,
            error_rate: None,
            request_count: None,
        })
}

fn alert_strategy() -> impl Strategy<Value = Alert> {
    (
        "[a-z0-9-]{1,12}",
        alert_type_strategy(),
        severity_strategy(),
        "[a-z]{1,10}",
        metric_type_strategy(),
        "[a-zA-Z0-9 ]{1,40}",
        "[a-zA-Z0-9 ]{1,80}",
        any::<f64>().prop_filter("finite", |v| v.is_finite()),
        any::<f64>().prop_filter("finite", |v| v.is_finite()),
        timestamp_strategy(),
        any::<bool>(),
    )
        .prop_map(
            |(id, alert_type, severity, service, metric_type, title, message, current_value, reference, timestamp, acknowledged)| Alert {
                id,
                alert_type,
                severity,
                service,
                metric_type,
                title,
                message,
                current_value,
                threshold_or_reference: reference,
                timestamp,
                acknowledged,
                acknowledged_by: None,
                acknowledged_at: None,
                resolved_at: None,
                labels: HashMap::new(),
                rule_id: None,
                metric_id: None,
                trace_id: None,
            },
        )
}

fn threshold_rule_strategy() -> impl Strategy<Value = ThresholdRule> {
    (
        "[a-z0-9-]{1,12}",
        "[a-zA-Z0-9 ]{1,30}",
        "[a-z]{0,10}",
        metric_type_strategy(),
        operator_strategy(),
        any::<f64>().prop_filter("finite", |v| v.is_finite()),
        severity_strategy(),
        1u64..100_000,
        0u64..100_000,
        any::<bool>(),
        timestamp_strategy(),
    )
        .prop_map(
            |(id, name, service, metric_type, operator, threshold, severity, window_seconds, cooldown_seconds, enabled, created_at)| {
                ThresholdRule {
                    id,
                    name,
                    description: String::new(),
                    service,
                    metric_type,
                    operator,
                    threshold,
                    severity,
                    window_seconds,
                    cooldown_seconds,
                    enabled,
                    notify_flags: Vec::new(),
                    created_at,
                    updated_at: created_at,
                }
            },
        )
}

proptest! {
    #[test]
    fn metric_sample_round_trips_through_json(sample in metric_sample_strategy()) {
        let json = serde_json::to_string(&sample).unwrap();
        let decoded: MetricSample = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(sample, decoded);
    }

    #[test]
    fn alert_round_trips_through_json(alert in alert_strategy()) {
        let json = serde_json::to_string(&alert).unwrap();
        let decoded: Alert = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(alert, decoded);
    }

    #[test]
    fn threshold_rule_round_trips_through_json(rule in threshold_rule_strategy()) {
        let json = serde_json::to_string(&rule).unwrap();
        let decoded: ThresholdRule = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(rule, decoded);
    }
}
