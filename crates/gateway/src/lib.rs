//! Gateway Stream Hub and Read API.
//!
//! Built on an Axum `Router` with `tower::ServiceBuilder` middleware
//! composition, a routing table, and an `AppState = Arc<...>` convention.
//! The streaming Hub (`hub.rs`) is the standard Tokio actor-over-mpsc
//! pattern.

pub mod api;
pub mod auth;
pub mod hub;
pub mod middleware;

use analyzer_bus::BusClient;
use analyzer_common::config::Config;
use analyzer_store::StateStore;
use std::sync::Arc;
use std::time::Instant;

pub struct AppStateInner {
    pub store: Arc<StateStore>,
    pub bus: Arc<BusClient>,
    pub config: Arc<Config>,
    pub hub: Arc<hub::Hub>,
    pub started_at: Instant,
}

pub type AppState = Arc<AppStateInner>;
