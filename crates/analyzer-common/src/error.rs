//! Error types and result handling for the service-health pipeline

use thiserror::Error;

/// Result type alias used throughout the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type shared by every component, with one variant per
/// category of failure the pipeline can hit.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("message bus error: {0}")]
    Bus(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("alert routed to dead-letter queue: {0}")]
    Dlq(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Transient I/O kinds that are safe to retry locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::Bus(_) | Error::Dispatch(_) | Error::Timeout(_)
        )
    }

    /// Stable category label for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Store(_) => "store",
            Error::Bus(_) => "bus",
            Error::Decode(_) => "decode",
            Error::Dispatch(_) => "dispatch",
            Error::Dlq(_) => "dlq",
            Error::InvalidRequest(_) => "request",
            Error::NotFound(_) => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Conflict(_) => "conflict",
            Error::RateLimited(_) => "rate_limited",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Serialization(_) => "serialization",
            Error::Generic(_) => "generic",
        }
    }

    /// Maps each variant onto a fixed HTTP status code for API responses.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidRequest(_) | Error::Decode(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::RateLimited(_) => 429,
            Error::Timeout(_) => 504,
            Error::Store(_) | Error::Bus(_) | Error::Dispatch(_) => 503,
            _ => 500,
        }
    }
}
