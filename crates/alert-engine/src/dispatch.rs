//! Dispatcher set: chat-webhook, email-via-HTTP-API and
//! generic webhook sinks, each exposing `{name, enabled, dispatch}` as a
//! trait object so the dispatch loop doesn't match on variants. Each
//! sink builds its payload with `reqwest::Client` + `serde_json::json!`.

use analyzer_common::config::DispatchersConfig;
use analyzer_common::error::{Error, Result};
use analyzer_common::types::{Alert, Severity};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn enabled(&self) -> bool;
    async fn dispatch(&self, alert: &Alert) -> Result<()>;
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "#2196f3",
        Severity::Warning => "#ff9800",
        Severity::Critical => "#f44336",
    }
}

/// POSTs a JSON payload shaped like a chat-app incoming webhook: a colored
/// attachment with a field list.
pub struct ChatWebhookDispatcher {
    url: Option<String>,
    enabled_flag: bool,
    client: reqwest::Client,
}

impl ChatWebhookDispatcher {
    pub fn new(cfg: &DispatchersConfig) -> Self {
        Self {
            url: cfg.chat_webhook_url.clone(),
            enabled_flag: cfg.chat_webhook_enabled,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.call_timeout_seconds))
                .build()
                .expect("reqwest client builder should not fail with static config"),
        }
    }
}

#[async_trait]
impl Dispatcher for ChatWebhookDispatcher {
    fn name(&self) -> &'static str {
        "chat-webhook"
    }

    fn enabled(&self) -> bool {
        self.enabled_flag && self.url.is_some()
    }

    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        let url = self.url.as_deref().ok_or_else(|| Error::Dispatch("chat webhook url not configured".into()))?;
        let payload = serde_json::json!({
            "attachments": [{
                "color": severity_color(alert.severity),
                "title": alert.title,
                "text": alert.message,
                "fields": [
                    { "title": "Service", "value": alert.service, "short": true },
                    { "title": "Metric", "value": alert.metric_type.as_str(), "short": true },
                    { "title": "Severity", "value": alert.severity.to_string(), "short": true },
                    { "title": "Alert ID", "value": alert.id, "short": true },
                ],
            }]
        });

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Dispatch(format!("chat webhook request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Dispatch(format!("chat webhook returned status {}", response.status())));
        }
        debug!(alert_id = %alert.id, "dispatched alert via chat webhook");
        Ok(())
    }
}

/// POSTs a JSON payload to an HTTP email-sending API, with an HTML body
/// templated from the alert.
pub struct EmailDispatcher {
    api_url: Option<String>,
    api_key: Option<String>,
    to_address: Option<String>,
    enabled_flag: bool,
    client: reqwest::Client,
}

impl EmailDispatcher {
    pub fn new(cfg: &DispatchersConfig) -> Self {
        Self {
            api_url: cfg.email_api_url.clone(),
            api_key: cfg.email_api_key.clone(),
            to_address: cfg.email_to_address.clone(),
            enabled_flag: cfg.email_enabled,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.call_timeout_seconds))
                .build()
                .expect("reqwest client builder should not fail with static config"),
        }
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    fn name(&self) -> &'static str {
        "email"
    }

    fn enabled(&self) -> bool {
        self.enabled_flag && self.api_url.is_some() && self.to_address.is_some()
    }

    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        let url = self.api_url.as_deref().ok_or_else(|| Error::Dispatch("email api url not configured".into()))?;
        let to = self.to_address.as_deref().ok_or_else(|| Error::Dispatch("email recipient not configured".into()))?;

        let html_body = format!(
            "<h2>{title}</h2><p>{message}</p><table><tr><td>Service</td><td>{service}</td></tr><tr><td>Metric</td><td>{metric}</td></tr><tr><td>Severity</td><td>{severity}</td></tr></table>",
            title = alert.title,
            message = alert.message,
            service = alert.service,
            metric = alert.metric_type.as_str(),
            severity = alert.severity,
        );
        let payload = serde_json::json!({
            "to": to,
            "subject": alert.title,
            "html_body": html_body,
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Dispatch(format!("email api request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Dispatch(format!("email api returned status {}", response.status())));
        }
        debug!(alert_id = %alert.id, "dispatched alert via email");
        Ok(())
    }
}

/// POSTs the alert as JSON to every configured URL; succeeds if any one
/// returns < 400, logging each URL's outcome.
pub struct GenericWebhookDispatcher {
    urls: Vec<String>,
    enabled_flag: bool,
    client: reqwest::Client,
}

impl GenericWebhookDispatcher {
    pub fn new(cfg: &DispatchersConfig) -> Self {
        Self {
            urls: cfg.generic_webhook_urls.clone(),
            enabled_flag: cfg.generic_webhook_enabled,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.call_timeout_seconds))
                .build()
                .expect("reqwest client builder should not fail with static config"),
        }
    }
}

#[async_trait]
impl Dispatcher for GenericWebhookDispatcher {
    fn name(&self) -> &'static str {
        "generic-webhook"
    }

    fn enabled(&self) -> bool {
        self.enabled_flag && !self.urls.is_empty()
    }

    async fn dispatch(&self, alert: &Alert) -> Result<()> {
        let mut last_err = None;
        for url in &self.urls {
            match self.client.post(url).json(alert).send().await {
                Ok(response) if response.status().as_u16() < 400 => {
                    debug!(alert_id = %alert.id, url = %url, "generic webhook delivered");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(alert_id = %alert.id, url = %url, status = %status, "generic webhook returned error status");
                    last_err = Some(Error::Dispatch(format!("{url} returned status {status}")));
                }
                Err(e) => {
                    warn!(alert_id = %alert.id, url = %url, error = %e, "generic webhook request failed");
                    last_err = Some(Error::Dispatch(format!("{url} request failed: {e}")));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Dispatch("no generic webhook urls configured".into())))
    }
}

/// Builds the active dispatcher set: only dispatchers whose `enabled()` is
/// true (configuration flag combined with required-parameter presence).
pub fn build_dispatch_set(cfg: &DispatchersConfig) -> Vec<Arc<dyn Dispatcher>> {
    let candidates: Vec<Arc<dyn Dispatcher>> = vec![
        Arc::new(ChatWebhookDispatcher::new(cfg)),
        Arc::new(EmailDispatcher::new(cfg)),
        Arc::new(GenericWebhookDispatcher::new(cfg)),
    ];
    candidates.into_iter().filter(|d| d.enabled()).collect()
}

/// Dispatches with one initial attempt plus up to `max_retries` retries
/// (`max_retries + 1` attempts total), sleeping `retry_delay * (attempt + 1)`
/// between tries.
pub async fn dispatch_with_retry(dispatcher: &dyn Dispatcher, alert: &Alert, max_retries: u32, retry_delay: Duration) -> Result<()> {
    let mut last_err = None;
    for attempt in 0..=max_retries {
        match dispatcher.dispatch(alert).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    dispatcher = dispatcher.name(),
                    attempt,
                    error = %e,
                    "dispatch attempt failed"
                );
                last_err = Some(e);
                if attempt < max_retries {
                    tokio::time::sleep(retry_delay * (attempt + 1)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Dispatch("dispatch exhausted with no recorded error".into())))
}
