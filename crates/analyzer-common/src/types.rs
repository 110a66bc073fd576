//! Core data model shared by every stage of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The metric types a rule or sample can carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Cpu,
    Memory,
    Latency,
    LatencyP95,
    LatencyP99,
    Error,
    ErrorRate,
    Status,
    RequestRate,
}

impl MetricType {
    /// The field projected from a [`MetricSample`] for rule evaluation.
    pub fn project(self, sample: &MetricSample) -> Option<f64> {
        match self {
            MetricType::Cpu => sample.cpu_usage,
            MetricType::Memory => sample.memory_usage,
            MetricType::LatencyP95 => sample.latency_p95,
            MetricType::LatencyP99 => sample.latency_p99,
            MetricType::ErrorRate => sample.error_rate,
            MetricType::RequestRate => sample.request_count,
            // Latency/Error/Status have no pre-aggregated projection; rules
            // against them fall back to the raw sample value.
            MetricType::Latency | MetricType::Error | MetricType::Status => Some(sample.value),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::Latency => "latency",
            MetricType::LatencyP95 => "latency_p95",
            MetricType::LatencyP99 => "latency_p99",
            MetricType::Error => "error",
            MetricType::ErrorRate => "error_rate",
            MetricType::Status => "status",
            MetricType::RequestRate => "request_rate",
        }
    }

    /// The metric types the deviation test is run over.
    pub fn deviation_candidates() -> [MetricType; 4] {
        [
            MetricType::Cpu,
            MetricType::Memory,
            MetricType::LatencyP95,
            MetricType::ErrorRate,
        ]
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metric data point produced by a service.
/// Immutable once accepted by the Ingest Consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub id: String,
    pub service: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,

    // Pre-aggregated fields; any producer may omit the ones it has no
    // value for.
    #[serde(default)]
    pub cpu_usage: Option<f64>,
    #[serde(default)]
    pub memory_usage: Option<f64>,
    #[serde(default)]
    pub latency_p50: Option<f64>,
    #[serde(default)]
    pub latency_p95: Option<f64>,
    #[serde(default)]
    pub latency_p99: Option<f64>,
    #[serde(default)]
    pub error_rate: Option<f64>,
    #[serde(default)]
    pub request_count: Option<f64>,
}

impl MetricSample {
    /// Nanosecond timestamp used as the sorted-set score in the state
    /// store.
    pub fn score_nanos(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or(0)
    }
}

/// Log severity levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// A structured log record. Not consumed by the core
/// pipeline; only read by the gateway's optional `log-stream` feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceLog {
    pub id: String,
    pub service: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Comparison operator used by a [`ThresholdRule`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Ge => value >= threshold,
            Operator::Le => value <= threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
            Operator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// Alert severity, ordered `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A fixed-shape threshold comparison rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Empty string means "any service" (wildcard).
    #[serde(default)]
    pub service: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub operator: Operator,
    pub threshold: f64,
    pub severity: Severity,
    pub window_seconds: u64,
    pub cooldown_seconds: u64,
    pub enabled: bool,
    #[serde(default)]
    pub notify_flags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThresholdRule {
    pub fn matches_service(&self, service: &str) -> bool {
        self.service.is_empty() || self.service == service
    }
}

/// The reason a dedup/cooldown cycle was triggered, also the
/// `Alert::alert_type` discriminant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ThresholdViolation,
    DeviationDetected,
    ErrorBurst,
    LatencySpike,
    MovingAvgAnomaly,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::ThresholdViolation => "threshold_violation",
            AlertType::DeviationDetected => "deviation_detected",
            AlertType::ErrorBurst => "error_burst",
            AlertType::LatencySpike => "latency_spike",
            AlertType::MovingAvgAnomaly => "moving_avg_anomaly",
        }
    }
}

/// An emitted alert. Mutable only via acknowledgement through the
/// Gateway Read API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub service: String,
    pub metric_type: MetricType,
    pub title: String,
    pub message: String,
    pub current_value: f64,
    pub threshold_or_reference: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub metric_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl Alert {
    /// `service:metric_type:reason` dedup key.
    pub fn dedup_key(service: &str, metric_type: MetricType, reason: AlertType) -> String {
        format!("{}:{}:{}", service, metric_type, reason.as_str())
    }

    /// `service:metric_type` cooldown key.
    pub fn cooldown_key(service: &str, metric_type: MetricType) -> String {
        format!("{}:{}", service, metric_type)
    }

    /// `service:metric_type:severity` suppression key.
    pub fn suppression_key(service: &str, metric_type: MetricType, severity: Severity) -> String {
        format!("{}:{}:{}", service, metric_type, severity)
    }

    /// `service:metric_type` group key.
    pub fn group_key(service: &str, metric_type: MetricType) -> String {
        format!("{}:{}", service, metric_type)
    }

    pub fn score_secs(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Dead-letter record written when dispatch retries are exhausted
///.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DlqRecord {
    pub alert: Alert,
    pub dispatcher: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert(service: &str, metric: MetricType, severity: Severity) -> Alert {
        Alert {
            id: "a1".into(),
            alert_type: AlertType::ThresholdViolation,
            severity,
            service: service.into(),
            metric_type: metric,
            title: "t".into(),
            message: "m".into(),
            current_value: 1.0,
            threshold_or_reference: 0.5,
            timestamp: Utc::now(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            labels: HashMap::new(),
            rule_id: None,
            metric_id: None,
            trace_id: None,
        }
    }

    #[test]
    fn operator_evaluates_all_variants() {
        assert!(Operator::Gt.evaluate(10.0, 5.0));
        assert!(!Operator::Gt.evaluate(5.0, 10.0));
        assert!(Operator::Le.evaluate(5.0, 5.0));
        assert!(Operator::Ne.evaluate(1.0, 2.0));
        assert!(Operator::Eq.evaluate(2.0, 2.0));
    }

    #[test]
    fn severity_orders_info_below_critical() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn rule_wildcard_service_matches_any() {
        let rule = ThresholdRule {
            id: "r1".into(),
            name: "n".into(),
            description: String::new(),
            service: String::new(),
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
        };
        assert!(rule.matches_service("auth"));
        assert!(rule.matches_service("orders"));
    }

    #[test]
    fn dedup_and_cooldown_keys_differ_by_reason() {
        let a = Alert::dedup_key("auth", MetricType::Cpu, AlertType::ThresholdViolation);
        let b = Alert::dedup_key("auth", MetricType::Cpu, AlertType::DeviationDetected);
        assert_ne!(a, b);
        let cooldown = Alert::cooldown_key("auth", MetricType::Cpu);
        assert!(!a.starts_with(&cooldown) || a.len() != cooldown.len());
    }

    #[test]
    fn round_trip_metric_sample_json() {
        let sample = MetricSample {
            id: "s1".into(),
            service: "auth".into(),
            metric_type: MetricType::Cpu,
            value: 85.0,
            unit: "percent".into(),
            timestamp: Utc::now(),
            labels: HashMap::new(),
            trace_id: None,
            span_id: None,
            cpu_usage: Some(85.0),
            memory_usage: None,
            latency_p50: None,
            latency_p95: None,
            latency_p99: None,
            error_rate: None,
            request_count: None,
        };
        let json = serde_json::to_string(&sample).unwrap();
        let decoded: MetricSample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn round_trip_alert_json() {
        let alert = sample_alert("orders", MetricType::LatencyP95, Severity::Warning);
        let json = serde_json::to_string(&alert).unwrap();
        let decoded: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert, decoded);
    }

    #[test]
    fn metric_type_projection_uses_table_mapping() {
        let mut sample = sample_metric();
        sample.cpu_usage = Some(42.0);
        sample.request_count = Some(7.0);
        assert_eq!(MetricType::Cpu.project(&sample), Some(42.0));
        assert_eq!(MetricType::RequestRate.project(&sample), Some(7.0));
        assert_eq!(MetricType::Memory.project(&sample), None);
    }

    fn sample_metric() -> MetricSample {
        MetricSample {
            id: "s".into(),
            service: "auth".into(),
            metric_type: MetricType::Cpu,
            value: 1.0,
            unit: "percent".into(),
            timestamp: Utc::now(),
            labels: HashMap::new(),
            trace_id: None,
            span_id: None,
            cpu_usage: None,
            memory_usage: None,
            latency_p50: None,
            latency_p95: None,
            latency_p99: None,
            error_rate: None,
            request_count: None,
        }
    }
}
