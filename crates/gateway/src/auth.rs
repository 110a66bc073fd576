//! Bearer token issuance and validation, via `jsonwebtoken` (see DESIGN.md).

use analyzer_common::config::GatewayConfig;
use analyzer_common::error::{Error, Result};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::api;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn issue_token(cfg: &GatewayConfig, username: &str) -> Result<String> {
    let exp = (chrono::Utc::now() + chrono::Duration::seconds(cfg.jwt_expiry_seconds as i64)).timestamp() as usize;
    let claims = Claims {
        sub: username.to_string(),
        exp,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()))
        .map_err(|e| Error::Unauthorized(format!("failed to issue token: {e}")))
}

pub fn validate_token(cfg: &GatewayConfig, token: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| Error::Unauthorized(format!("invalid token: {e}")))
}

/// Extracts a bearer token from the `Authorization` header or, for
/// WebSocket clients that cannot set headers, a `token` query parameter
///.
pub fn extract_bearer(headers: &HeaderMap, token_query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(rest) = s.strip_prefix("Bearer ") {
                return Some(rest.to_string());
            }
        }
    }
    token_query.map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Exchanges fixed admin credentials for a bearer token. Real identity
/// management is delegated elsewhere; this endpoint only proves the
/// contract the rest of the gateway depends on.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let cfg = &state.config.gateway;
    if req.username == cfg.admin_username && req.password == cfg.admin_password {
        match issue_token(cfg, &req.username) {
            Ok(token) => api::ok(LoginResponse { token }),
            Err(e) => api::error_response(&e),
        }
    } else {
        api::error_response(&Error::Unauthorized("invalid credentials".into()))
    }
}

/// Enforces bearer auth on every route it wraps.
pub async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    match extract_bearer(&headers, None) {
        Some(token) if validate_token(&state.config.gateway, &token).is_ok() => next.run(request).await,
        _ => api::error_response(&Error::Unauthorized("missing or invalid bearer token".into())),
    }
}
