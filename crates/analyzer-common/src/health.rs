//! Health/status types shared by the gateway's dashboard summary and any
//! component that wants to report liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthLevel,
    pub message: String,
    pub last_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall_health: HealthLevel,
    pub components: HashMap<String, ComponentHealth>,
    pub last_check: DateTime<Utc>,
    pub uptime_seconds: u64,
}

impl HealthStatus {
    pub fn calculate_overall_health(&mut self) {
        if self.components.is_empty() {
            self.overall_health = HealthLevel::Unknown;
            return;
        }
        let critical = self
            .components
            .values()
            .any(|c| c.status == HealthLevel::Critical);
        let degraded = self
            .components
            .values()
            .any(|c| c.status == HealthLevel::Degraded);
        self.overall_health = if critical {
            HealthLevel::Critical
        } else if degraded {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };
    }
}
