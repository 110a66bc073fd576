//! Rule Registry: a hashed mapping `rule_id → ThresholdRule`.
//! Deserialization is lenient — garbage entries are logged and skipped,
//! never surfaced as an iteration error.

use analyzer_common::error::{Error, Result};
use analyzer_common::types::ThresholdRule;
use tracing::warn;

use crate::{now, StateStore};

impl StateStore {
    pub fn get_rule(&self, id: &str) -> Result<Option<ThresholdRule>> {
        match self
            .rules
            .get(id)
            .map_err(|e| Error::Store(format!("rule get failed: {e}")))?
        {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(rule) => Ok(Some(rule)),
                Err(e) => {
                    warn!(rule_id = id, error = %e, "skipping malformed rule entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Lists every rule whose stored JSON parses; malformed entries are
    /// logged and excluded rather than failing the whole listing.
    pub fn list_rules(&self) -> Result<Vec<ThresholdRule>> {
        let mut rules = Vec::new();
        for entry in self.rules.iter() {
            let (key, value) = entry.map_err(|e| Error::Store(format!("rule scan failed: {e}")))?;
            match serde_json::from_slice::<ThresholdRule>(&value) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    let id = String::from_utf8_lossy(&key).into_owned();
                    warn!(rule_id = %id, error = %e, "skipping malformed rule entry");
                }
            }
        }
        Ok(rules)
    }

    pub fn list_enabled_rules(&self) -> Result<Vec<ThresholdRule>> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|r| r.enabled)
            .collect())
    }

    pub fn list_rules_by_service(&self, service: &str) -> Result<Vec<ThresholdRule>> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|r| r.matches_service(service))
            .collect())
    }

    pub fn create_rule(&self, rule: ThresholdRule) -> Result<ThresholdRule> {
        let bytes = serde_json::to_vec(&rule)?;
        self.rules
            .insert(rule.id.as_bytes(), bytes)
            .map_err(|e| Error::Store(format!("rule insert failed: {e}")))?;
        Ok(rule)
    }

    /// Updates a rule, bumping `updated_at`. Rejects unknown ids.
    pub fn update_rule(&self, mut rule: ThresholdRule) -> Result<ThresholdRule> {
        if !self
            .rules
            .contains_key(rule.id.as_bytes())
            .map_err(|e| Error::Store(format!("rule lookup failed: {e}")))?
        {
            return Err(Error::NotFound(format!("rule {} does not exist", rule.id)));
        }
        rule.updated_at = now();
        let bytes = serde_json::to_vec(&rule)?;
        self.rules
            .insert(rule.id.as_bytes(), bytes)
            .map_err(|e| Error::Store(format!("rule update failed: {e}")))?;
        Ok(rule)
    }

    pub fn delete_rule(&self, id: &str) -> Result<()> {
        self.rules
            .remove(id.as_bytes())
            .map_err(|e| Error::Store(format!("rule delete failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_common::types::{MetricType, Operator, Severity};
    use chrono::Utc;

    fn rule(id: &str, service: &str, enabled: bool) -> ThresholdRule {
        ThresholdRule {
            id: id.to_string(),
            name: "cpu high".to_string(),
            description: String::new(),
            service: service.to_string(),
            metric_type: MetricType::Cpu,
            operator: Operator::Gt,
            threshold: 80.0,
            severity: Severity::Critical,
            window_seconds: 300,
            cooldown_seconds: 300,
            enabled,
            notify_flags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_get_update_delete_round_trip() {
        let (_dir, store) = store();
        store.create_rule(rule("r1", "auth", true)).unwrap();

        let fetched = store.get_rule("r1").unwrap().unwrap();
        assert_eq!(fetched.threshold, 80.0);

        let mut updated = fetched.clone();
        updated.threshold = 90.0;
        let result = store.update_rule(updated).unwrap();
        assert_eq!(result.threshold, 90.0);
        assert!(result.updated_at >= fetched.updated_at);

        store.delete_rule("r1").unwrap();
        assert!(store.get_rule("r1").unwrap().is_none());
    }

    #[test]
    fn update_unknown_rule_is_rejected() {
        let (_dir, store) = store();
        let err = store.update_rule(rule("missing", "auth", true)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn list_enabled_filters_disabled_rules() {
        let (_dir, store) = store();
        store.create_rule(rule("r1", "auth", true)).unwrap();
        store.create_rule(rule("r2", "auth", false)).unwrap();
        let enabled = store.list_enabled_rules().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "r1");
    }

    #[test]
    fn list_by_service_includes_wildcard_rules() {
        let (_dir, store) = store();
        store.create_rule(rule("r1", "auth", true)).unwrap();
        store.create_rule(rule("r2", "", true)).unwrap();
        store.create_rule(rule("r3", "orders", true)).unwrap();
        let matched = store.list_rules_by_service("auth").unwrap();
        let ids: Vec<_> = matched.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"r1"));
        assert!(ids.contains(&"r2"));
        assert!(!ids.contains(&"r3"));
    }

    #[test]
    fn malformed_entry_is_skipped_not_errored() {
        let (_dir, store) = store();
        store.create_rule(rule("r1", "auth", true)).unwrap();
        store.rules.insert(b"garbage", b"{not json".to_vec()).unwrap();
        let rules = store.list_rules().unwrap();
        assert_eq!(rules.len(), 1);
    }
}
