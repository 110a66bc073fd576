//! Gateway Read API and router assembly: a routing table over
//! `tower::ServiceBuilder` middleware composition.

use analyzer_common::error::Error;
use analyzer_common::health::{ComponentHealth, HealthLevel, HealthStatus};
use analyzer_common::types::{MetricType, Operator, Severity, ThresholdRule};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth;
use crate::hub;
use crate::middleware::{RequestIdLayer, RequestLogLayer};
use crate::AppState;

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<serde_json::Value>,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }),
    )
        .into_response()
}

pub fn ok_with_meta<T: Serialize>(data: T, meta: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(meta),
        }),
    )
        .into_response()
}

pub fn error_response(e: &Error) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::warn!(category = e.category(), status = status.as_u16(), error = %e, "request failed");
    (
        status,
        Json(Envelope::<()> {
            success: false,
            data: None,
            error: Some(e.to_string()),
            meta: None,
        }),
    )
        .into_response()
}

/// Builds the full router: public health/login routes, bearer-protected
/// REST routes, and the `/ws` upgrade endpoint.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/services", get(list_services))
        .route("/api/services/:name/metrics", get(service_metrics))
        .route("/api/metrics/latest", get(latest_metrics))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/:id", get(get_alert))
        .route("/api/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/api/rules", get(list_rules).post(create_rule))
        .route(
            "/api/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_auth));

    let public = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/login", post(auth::login))
        .route("/ws", get(stream_upgrade));

    Router::new().merge(public).merge(protected).with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
                    .max_age(Duration::from_secs(3600)),
            )
            .layer(RequestIdLayer::new())
            .layer(RequestLogLayer::new()),
    )
}

/// Liveness probe: the process is accepting connections. Always returns
/// healthy once the router is serving traffic.
async fn health() -> Response {
    ok(serde_json::json!({ "status": "healthy" }))
}

/// Readiness probe: aggregates component health via `ComponentHealth`/
/// `HealthStatus`. Degrades to `critical` if the
/// state store can't be reached.
async fn ready(State(state): State<AppState>) -> Response {
    let mut components = HashMap::new();
    let store_health = match state.store.list_rules() {
        Ok(_) => ComponentHealth {
            status: HealthLevel::Healthy,
            message: "state store reachable".to_string(),
            last_check: Utc::now(),
        },
        Err(e) => ComponentHealth {
            status: HealthLevel::Critical,
            message: format!("state store unreachable: {e}"),
            last_check: Utc::now(),
        },
    };
    components.insert("state_store".to_string(), store_health);

    let mut status = HealthStatus {
        overall_health: HealthLevel::Unknown,
        components,
        last_check: Utc::now(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };
    status.calculate_overall_health();

    if status.overall_health == HealthLevel::Critical {
        (StatusCode::SERVICE_UNAVAILABLE, Json(Envelope {
            success: false,
            data: Some(status),
            error: Some("dependency unhealthy".to_string()),
            meta: None,
        }))
            .into_response()
    } else {
        ok(status)
    }
}

#[derive(Deserialize)]
struct StreamQuery {
    token: Option<String>,
}

async fn stream_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Response {
    let token = match auth::extract_bearer(&headers, query.token.as_deref()) {
        Some(token) => token,
        None => return error_response(&Error::Unauthorized("missing bearer token".into())),
    };
    if auth::validate_token(&state.config.gateway, &token).is_err() {
        return error_response(&Error::Unauthorized("invalid bearer token".into()));
    }

    let gateway_cfg = state.config.gateway.clone();
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| {
        hub::handle_socket(
            socket,
            hub,
            Duration::from_secs(gateway_cfg.ws_ping_interval_seconds),
            Duration::from_secs(gateway_cfg.ws_pong_timeout_seconds),
            gateway_cfg.max_client_message_bytes,
            tokio_util::sync::CancellationToken::new(),
        )
    })
}

const MERGEABLE_METRIC_TYPES: [MetricType; 4] = [
    MetricType::Cpu,
    MetricType::Memory,
    MetricType::LatencyP95,
    MetricType::ErrorRate,
];

#[derive(Serialize)]
struct ServiceSummary {
    service: String,
    status: &'static str,
}

fn status_for_sample(sample: Option<&analyzer_common::types::MetricSample>) -> &'static str {
    let Some(sample) = sample else {
        return "unknown";
    };
    let warning = sample.cpu_usage.unwrap_or(0.0) > 80.0
        || sample.memory_usage.unwrap_or(0.0) > 80.0
        || sample.error_rate.unwrap_or(0.0) > 5.0;
    if warning {
        "warning"
    } else {
        "healthy"
    }
}

async fn list_services(State(state): State<AppState>) -> Response {
    let services = &state.config.analyzer.known_services;
    let mut summaries = Vec::with_capacity(services.len());
    for service in services {
        match state.store.latest_composite(service, &MERGEABLE_METRIC_TYPES) {
            Ok(sample) => summaries.push(ServiceSummary {
                service: service.clone(),
                status: status_for_sample(sample.as_ref()),
            }),
            Err(e) => return error_response(&e),
        }
    }
    ok(summaries)
}

#[derive(Deserialize)]
struct MetricsWindowQuery {
    #[serde(rename = "type")]
    metric_type: Option<MetricType>,
    window: Option<String>,
}

fn parse_window(raw: &str) -> Duration {
    let raw = raw.trim();
    let (number, suffix) = raw.split_at(raw.len().saturating_sub(1));
    let value: u64 = number.parse().unwrap_or(5);
    match suffix {
        "s" => Duration::from_secs(value),
        "h" => Duration::from_secs(value * 3600),
        "d" => Duration::from_secs(value * 86_400),
        _ => Duration::from_secs(value * 60), // default / "m" suffix
    }
}

async fn service_metrics(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<MetricsWindowQuery>,
) -> Response {
    let window = parse_window(query.window.as_deref().unwrap_or("5m"));
    let result = match query.metric_type {
        Some(metric_type) => state.store.range_samples(&name, metric_type, window),
        None => state.store.range_samples_any_type(&name, window),
    };
    match result {
        Ok(samples) => ok(samples),
        Err(e) => error_response(&e),
    }
}

async fn latest_metrics(State(state): State<AppState>) -> Response {
    let mut latest: HashMap<String, analyzer_common::types::MetricSample> = HashMap::new();
    for service in &state.config.analyzer.known_services {
        match state.store.latest_composite(service, &MERGEABLE_METRIC_TYPES) {
            Ok(Some(sample)) => {
                latest.insert(service.clone(), sample);
            }
            Ok(None) => {}
            Err(e) => return error_response(&e),
        }
    }
    ok(latest)
}

#[derive(Deserialize)]
struct AlertsQuery {
    service: Option<String>,
    severity: Option<Severity>,
    page: Option<usize>,
    limit: Option<usize>,
}

async fn list_alerts(State(state): State<AppState>, Query(query): Query<AlertsQuery>) -> Response {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(state.config.gateway.default_page_size);
    match state
        .store
        .query_alerts(query.service.as_deref(), query.severity, page, limit)
    {
        Ok(result) => ok_with_meta(
            result.alerts.clone(),
            serde_json::json!({
                "total": result.total,
                "page": result.page,
                "limit": result.limit,
                "pages": result.pages(),
            }),
        ),
        Err(e) => error_response(&e),
    }
}

async fn get_alert(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_alert(&id) {
        Ok(Some(alert)) => ok(alert),
        Ok(None) => error_response(&Error::NotFound(format!("alert {id} not found"))),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct AcknowledgeRequest {
    #[serde(default = "default_actor")]
    actor: String,
}

fn default_actor() -> String {
    "unknown".to_string()
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<AcknowledgeRequest>>,
) -> Response {
    let actor = body.map(|Json(req)| req.actor).unwrap_or_else(default_actor);
    match state.store.acknowledge_alert(&id, &actor) {
        Ok(alert) => ok(alert),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct RulesQuery {
    service: Option<String>,
}

async fn list_rules(State(state): State<AppState>, Query(query): Query<RulesQuery>) -> Response {
    let result = match query.service {
        Some(service) => state.store.list_rules_by_service(&service),
        None => state.store.list_rules(),
    };
    match result {
        Ok(rules) => ok(rules),
        Err(e) => error_response(&e),
    }
}

async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_rule(&id) {
        Ok(Some(rule)) => ok(rule),
        Ok(None) => error_response(&Error::NotFound(format!("rule {id} not found"))),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct RuleRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    service: String,
    #[serde(rename = "type")]
    metric_type: MetricType,
    operator: Operator,
    threshold: f64,
    severity: Severity,
    window_seconds: u64,
    cooldown_seconds: u64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    notify_flags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

async fn create_rule(State(state): State<AppState>, Json(req): Json<RuleRequest>) -> Response {
    let now = Utc::now();
    let rule = ThresholdRule {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        service: req.service,
        metric_type: req.metric_type,
        operator: req.operator,
        threshold: req.threshold,
        severity: req.severity,
        window_seconds: req.window_seconds,
        cooldown_seconds: req.cooldown_seconds,
        enabled: req.enabled,
        notify_flags: req.notify_flags,
        created_at: now,
        updated_at: now,
    };
    match state.store.create_rule(rule) {
        Ok(rule) => ok(rule),
        Err(e) => error_response(&e),
    }
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RuleRequest>,
) -> Response {
    let existing = match state.store.get_rule(&id) {
        Ok(Some(rule)) => rule,
        Ok(None) => return error_response(&Error::NotFound(format!("rule {id} not found"))),
        Err(e) => return error_response(&e),
    };
    let updated = ThresholdRule {
        id,
        name: req.name,
        description: req.description,
        service: req.service,
        metric_type: req.metric_type,
        operator: req.operator,
        threshold: req.threshold,
        severity: req.severity,
        window_seconds: req.window_seconds,
        cooldown_seconds: req.cooldown_seconds,
        enabled: req.enabled,
        notify_flags: req.notify_flags,
        created_at: existing.created_at,
        updated_at: existing.updated_at,
    };
    match state.store.update_rule(updated) {
        Ok(rule) => ok(rule),
        Err(e) => error_response(&e),
    }
}

async fn delete_rule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_rule(&id) {
        Ok(()) => ok(serde_json::json!({ "deleted": id })),
        Err(e) => error_response(&e),
    }
}

#[derive(Serialize)]
struct DashboardStats {
    healthy_services: usize,
    warning_services: usize,
    total_services: usize,
    alerts_by_severity: HashMap<String, usize>,
    recent_alerts: Vec<analyzer_common::types::Alert>,
    enabled_rules: usize,
}

async fn dashboard_stats(State(state): State<AppState>) -> Response {
    let services = &state.config.analyzer.known_services;
    let mut healthy = 0usize;
    let mut warning = 0usize;
    for service in services {
        match state.store.latest_composite(service, &MERGEABLE_METRIC_TYPES) {
            Ok(sample) => {
                if status_for_sample(sample.as_ref()) == "warning" {
                    warning += 1;
                } else {
                    healthy += 1;
                }
            }
            Err(e) => return error_response(&e),
        }
    }

    let mut alerts_by_severity = HashMap::new();
    for severity in [Severity::Info, Severity::Warning, Severity::Critical] {
        match state.store.query_alerts(None, Some(severity), 1, usize::MAX) {
            Ok(page) => {
                alerts_by_severity.insert(severity.to_string(), page.total);
            }
            Err(e) => return error_response(&e),
        }
    }

    let recent_alerts = match state.store.most_recent_alerts(5) {
        Ok(alerts) => alerts,
        Err(e) => return error_response(&e),
    };

    let enabled_rules = match state.store.list_enabled_rules() {
        Ok(rules) => rules.len(),
        Err(e) => return error_response(&e),
    };

    ok(DashboardStats {
        healthy_services: healthy,
        warning_services: warning,
        total_services: services.len(),
        alerts_by_severity,
        recent_alerts,
        enabled_rules,
    })
}
