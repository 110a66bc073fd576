//! Layered configuration.
//!
//! Defaults are loaded first, then an optional TOML file, then
//! `ANALYZER__`-prefixed environment variables, the layered-config shape
//! generalized to the options this pipeline needs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration, one struct per subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub analyzer: AnalyzerConfig,
    pub alert_engine: AlertEngineConfig,
    pub dispatchers: DispatchersConfig,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            bus: BusConfig::default(),
            analyzer: AnalyzerConfig::default(),
            alert_engine: AlertEngineConfig::default(),
            dispatchers: DispatchersConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, overlay an optional TOML file, overlay environment
    /// variables prefixed `ANALYZER__` (double-underscore section
    /// separator).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default()).map_err(|e| {
                Error::Configuration(format!("failed to seed defaults: {e}"))
            })?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ANALYZER")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build config: {e}")))?
            .try_deserialize()
            .map_err(|e| Error::Configuration(format!("failed to deserialize config: {e}")))
    }
}

/// State store (C1) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: String,
    pub retention_seconds: u64,
    pub latest_pointer_ttl_seconds: u64,
    pub alert_journal_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/state-store".to_string(),
            retention_seconds: 24 * 3600,
            latest_pointer_ttl_seconds: 600,
            alert_journal_ttl_seconds: 7 * 24 * 3600,
            cleanup_interval_seconds: 60,
        }
    }
}

/// Message bus (C2) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub url: String,
    pub metrics_topic: String,
    pub logs_topic: String,
    pub alerts_topic: String,
    pub alerts_dlq_topic: String,
    pub ingest_consumer_group: String,
    pub alert_processor_consumer_group: String,
    pub gateway_consumer_group: String,
    pub commit_interval_seconds: u64,
    pub stream_retention_seconds: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            metrics_topic: "service-metrics".to_string(),
            logs_topic: "service-logs".to_string(),
            alerts_topic: "alerts".to_string(),
            alerts_dlq_topic: "alerts-dlq".to_string(),
            ingest_consumer_group: "ingest-consumer".to_string(),
            alert_processor_consumer_group: "alert-processor".to_string(),
            gateway_consumer_group: "gateway-stream-hub".to_string(),
            commit_interval_seconds: 1,
            stream_retention_seconds: 7 * 24 * 3600,
        }
    }
}

/// Analyzer Engine (C3/C4/C5) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub analysis_interval_seconds: u64,
    pub sliding_window_seconds: u64,
    pub rolling_window_seconds: u64,
    pub deviation_multiplier: f64,
    pub min_samples_for_deviation: usize,
    pub default_cooldown_seconds: u64,
    pub dedup_ttl_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// Implicit known-service set used when no rule targets a specific
    /// service.
    pub known_services: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            analysis_interval_seconds: 5,
            sliding_window_seconds: 300,
            rolling_window_seconds: 3600,
            deviation_multiplier: 2.0,
            min_samples_for_deviation: 10,
            default_cooldown_seconds: 300,
            dedup_ttl_seconds: 300,
            max_retries: 5,
            retry_base_delay_ms: 100,
            retry_max_backoff_ms: 30_000,
            known_services: Vec::new(),
        }
    }
}

impl AnalyzerConfig {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_seconds)
    }

    pub fn sliding_window(&self) -> Duration {
        Duration::from_secs(self.sliding_window_seconds)
    }
}

/// Alert Processor (C6) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEngineConfig {
    pub grouping_window_seconds: u64,
    pub suppression_window_seconds: u64,
    pub max_alerts_per_group: usize,
    pub suppression_sweep_interval_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            grouping_window_seconds: 60,
            suppression_window_seconds: 300,
            max_alerts_per_group: 10,
            suppression_sweep_interval_seconds: 60,
            max_retries: 5,
            retry_delay_ms: 200,
        }
    }
}

impl AlertEngineConfig {
    pub fn grouping_window(&self) -> Duration {
        Duration::from_secs(self.grouping_window_seconds)
    }
}

/// One entry per dispatcher (C7); `enabled` is combined with
/// required-parameter presence at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchersConfig {
    pub chat_webhook_url: Option<String>,
    pub chat_webhook_enabled: bool,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub email_to_address: Option<String>,
    pub email_enabled: bool,
    pub generic_webhook_urls: Vec<String>,
    pub generic_webhook_enabled: bool,
    pub call_timeout_seconds: u64,
}

impl Default for DispatchersConfig {
    fn default() -> Self {
        Self {
            chat_webhook_url: None,
            chat_webhook_enabled: false,
            email_api_url: None,
            email_api_key: None,
            email_to_address: None,
            email_enabled: false,
            generic_webhook_urls: Vec::new(),
            generic_webhook_enabled: false,
            call_timeout_seconds: 15,
        }
    }
}

/// Gateway (C8/C9) HTTP and streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: u16,
    pub client_send_queue_capacity: usize,
    pub ws_ping_interval_seconds: u64,
    pub ws_pong_timeout_seconds: u64,
    pub max_client_message_bytes: usize,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub admin_username: String,
    pub admin_password: String,
    pub enable_log_stream: bool,
    pub default_page_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            client_send_queue_capacity: 256,
            ws_ping_interval_seconds: 45,
            ws_pong_timeout_seconds: 60,
            max_client_message_bytes: 512,
            jwt_secret: "change-me".to_string(),
            jwt_expiry_seconds: 8 * 3600,
            admin_username: "admin".to_string(),
            admin_password: "change-me".to_string(),
            enable_log_stream: false,
            default_page_size: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_6_5() {
        let cfg = Config::default();
        assert_eq!(cfg.analyzer.analysis_interval_seconds, 5);
        assert_eq!(cfg.analyzer.sliding_window_seconds, 300);
        assert_eq!(cfg.analyzer.deviation_multiplier, 2.0);
        assert_eq!(cfg.analyzer.min_samples_for_deviation, 10);
        assert_eq!(cfg.analyzer.default_cooldown_seconds, 300);
        assert_eq!(cfg.store.cleanup_interval_seconds, 60);
        assert_eq!(cfg.alert_engine.grouping_window_seconds, 60);
        assert_eq!(cfg.alert_engine.suppression_window_seconds, 300);
        assert_eq!(cfg.alert_engine.max_alerts_per_group, 10);
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let cfg = Config::load(None).expect("defaults must load");
        assert_eq!(cfg.gateway.port, 8080);
    }
}
