//! Alert journal.

use analyzer_common::error::{Error, Result};
use analyzer_common::types::{Alert, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::StateStore;

const SCORE_WIDTH: usize = 20;

fn journal_key(alert: &Alert) -> Vec<u8> {
    format!("{score:0width$}\0{id}", score = alert.score_secs(), width = SCORE_WIDTH, id = alert.id)
        .into_bytes()
}

#[derive(Serialize, Deserialize)]
struct JournalEntry {
    alert: Alert,
    expires_at: DateTime<Utc>,
}

/// A page of alerts plus the total count across the full filtered set
///.
#[derive(Debug, Clone)]
pub struct AlertPage {
    pub alerts: Vec<Alert>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl AlertPage {
    pub fn pages(&self) -> usize {
        if self.limit == 0 {
            0
        } else {
            (self.total + self.limit - 1) / self.limit
        }
    }
}

impl StateStore {
    /// Appends an alert to the journal (sorted set, score = timestamp-sec)
    /// and writes the by-id lookup entry with the configured TTL.
    pub fn insert_alert(&self, alert: &Alert, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let entry = JournalEntry {
            alert: alert.clone(),
            expires_at,
        };
        let bytes = serde_json::to_vec(&entry)?;

        self.journal
            .insert(journal_key(alert), bytes.clone())
            .map_err(|e| Error::Store(format!("journal insert failed: {e}")))?;
        self.by_id
            .insert(alert.id.as_bytes(), bytes)
            .map_err(|e| Error::Store(format!("alert by-id insert failed: {e}")))?;
        Ok(())
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let Some(bytes) = self
            .by_id
            .get(id.as_bytes())
            .map_err(|e| Error::Store(format!("alert get failed: {e}")))?
        else {
            return Ok(None);
        };
        let entry: JournalEntry = serde_json::from_slice(&bytes)?;
        if entry.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(entry.alert))
    }

    /// Acknowledges an alert, writing the ack fields back with the
    /// journal TTL preserved. Idempotent: a second
    /// acknowledgement leaves `acknowledged_by` set to the first actor
    ///.
    pub fn acknowledge_alert(&self, id: &str, actor: &str) -> Result<Alert> {
        let Some(bytes) = self
            .by_id
            .get(id.as_bytes())
            .map_err(|e| Error::Store(format!("alert get failed: {e}")))?
        else {
            return Err(Error::NotFound(format!("alert {id} not found")));
        };
        let mut entry: JournalEntry = serde_json::from_slice(&bytes)?;
        if !entry.alert.acknowledged {
            entry.alert.acknowledged = true;
            entry.alert.acknowledged_by = Some(actor.to_string());
            entry.alert.acknowledged_at = Some(Utc::now());
        }

        let new_bytes = serde_json::to_vec(&entry)?;
        self.by_id
            .insert(id.as_bytes(), new_bytes.clone())
            .map_err(|e| Error::Store(format!("alert ack write failed: {e}")))?;
        self.journal
            .insert(journal_key(&entry.alert), new_bytes)
            .map_err(|e| Error::Store(format!("journal ack write failed: {e}")))?;
        Ok(entry.alert)
    }

    /// Paged, service/severity-filtered query sorted descending by score
    ///.
    pub fn query_alerts(
        &self,
        service: Option<&str>,
        severity: Option<Severity>,
        page: usize,
        limit: usize,
    ) -> Result<AlertPage> {
        let now = Utc::now();
        let mut matched = Vec::new();
        for entry in self.journal.iter() {
            let (_, value) = entry.map_err(|e| Error::Store(format!("journal scan failed: {e}")))?;
            let parsed: JournalEntry = serde_json::from_slice(&value)?;
            if parsed.expires_at <= now {
                continue;
            }
            if let Some(service) = service {
                if parsed.alert.service != service {
                    continue;
                }
            }
            if let Some(severity) = severity {
                if parsed.alert.severity != severity {
                    continue;
                }
            }
            matched.push(parsed.alert);
        }
        // journal.iter() yields ascending key order (score asc); the API
        // wants descending (most recent first).
        matched.reverse();

        let total = matched.len();
        let page = page.max(1);
        let start = (page - 1) * limit;
        let alerts = if start >= total {
            Vec::new()
        } else {
            matched[start..(start + limit).min(total)].to_vec()
        };

        Ok(AlertPage {
            alerts,
            total,
            page,
            limit,
        })
    }

    /// The `n` most recent alerts irrespective of filters.
    pub fn most_recent_alerts(&self, n: usize) -> Result<Vec<Alert>> {
        Ok(self.query_alerts(None, None, 1, n)?.alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use analyzer_common::types::{AlertType, MetricType};

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn alert(id: &str, service: &str, severity: Severity, ts: DateTime<Utc>) -> Alert {
        Alert {
            id: id.to_string(),
            alert_type: AlertType::ThresholdViolation,
            severity,
            service: service.to_string(),
            metric_type: MetricType::Cpu,
            title: "high cpu".to_string(),
            message: "cpu over threshold".to_string(),
            current_value: 90.0,
            threshold_or_reference: 80.0,
            timestamp: ts,
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
    fn query_filters_by_service_and_severity_and_paginates() {
        let (_dir, store) = store();
        let base = Utc::now();
        for i in 0..5u32 {
            let a = alert(
                &format!("a{i}"),
                if i % 2 == 0 { "auth" } else { "orders" },
                Severity::Critical,
                base + chrono::Duration::seconds(i as i64),
            );
            store.insert_alert(&a, Duration::from_secs(86400)).unwrap();
        }

        let page = store.query_alerts(Some("auth"), Some(Severity::Critical), 1, 2).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.alerts.len(), 2);
        assert_eq!(page.pages(), 2);
        // Descending by timestamp: a4 then a2.
        assert_eq!(page.alerts[0].id, "a4");
        assert_eq!(page.alerts[1].id, "a2");
    }

    #[test]
    fn acknowledge_is_idempotent_on_first_actor() {
        let (_dir, store) = store();
        let a = alert("a1", "auth", Severity::Critical, Utc::now());
        store.insert_alert(&a, Duration::from_secs(86400)).unwrap();

        let acked = store.acknowledge_alert("a1", "alice").unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("alice"));

        let acked_again = store.acknowledge_alert("a1", "bob").unwrap();
        assert_eq!(acked_again.acknowledged_by.as_deref(), Some("alice"));
    }

    #[test]
    fn get_missing_alert_returns_none() {
        let (_dir, store) = store();
        assert!(store.get_alert("missing").unwrap().is_none());
    }
}
