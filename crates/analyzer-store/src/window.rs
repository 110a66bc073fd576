//! Metric Window: an ordered-by-timestamp set of samples per
//! `(service, type)`, plus a short-TTL "latest" pointer for O(1) reads.
//!
//! Keys are zero-padded so `sled`'s natural byte ordering doubles as score
//! ordering, the same way a priority queue turns a zero-padded sequence
//! number into a sortable key — here applied to timestamp-as-score
//! instead of priority-as-score.

use analyzer_common::error::{Error, Result};
use analyzer_common::types::{MetricSample, MetricType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::StateStore;

const NANOS_WIDTH: usize = 20;

fn window_prefix(service: &str, metric_type: MetricType) -> Vec<u8> {
    format!("{service}\0{metric_type}\0").into_bytes()
}

fn window_key(service: &str, metric_type: MetricType, score_nanos: i64, payload: &[u8]) -> Vec<u8> {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    let digest = hasher.finish();
    format!(
        "{service}\0{metric_type}\0{score:0width$}\0{digest:016x}",
        score = score_nanos,
        width = NANOS_WIDTH,
        digest = digest
    )
    .into_bytes()
}

fn latest_key(service: &str, metric_type: MetricType) -> Vec<u8> {
    format!("{service}\0{metric_type}").into_bytes()
}

#[derive(Serialize, Deserialize)]
struct LatestEntry {
    sample: MetricSample,
    expires_at: DateTime<Utc>,
}

impl StateStore {
    /// Appends a sample under its timestamp score. Idempotent: an
    /// identical `(timestamp, payload)` pair collapses to the same member
    /// key, so redelivery from an at-least-once bus never double-counts
    ///.
    pub fn append_sample(&self, sample: &MetricSample, latest_ttl: Duration) -> Result<()> {
        let payload = serde_json::to_vec(sample)?;
        let key = window_key(&sample.service, sample.metric_type, sample.score_nanos(), &payload);
        self.windows
            .insert(key, payload.clone())
            .map_err(|e| Error::Store(format!("window append failed: {e}")))?;

        let latest = LatestEntry {
            sample: sample.clone(),
            expires_at: Utc::now() + chrono::Duration::from_std(latest_ttl).unwrap_or_default(),
        };
        let latest_bytes = serde_json::to_vec(&latest)?;
        self.latest
            .insert(latest_key(&sample.service, sample.metric_type), latest_bytes)
            .map_err(|e| Error::Store(format!("latest pointer write failed: {e}")))?;
        Ok(())
    }

    /// Returns samples with score >= `now - window`, ascending by
    /// timestamp.
    pub fn range_samples(
        &self,
        service: &str,
        metric_type: MetricType,
        window: Duration,
    ) -> Result<Vec<MetricSample>> {
        let cutoff = cutoff_nanos(window);
        let prefix = window_prefix(service, metric_type);
        let mut start = prefix.clone();
        start.extend(format!("{cutoff:0width$}", cutoff = cutoff, width = NANOS_WIDTH).into_bytes());

        let mut samples = Vec::new();
        for entry in self.windows.range(start..).take_while(|r| {
            r.as_ref()
                .map(|(k, _)| k.starts_with(&prefix))
                .unwrap_or(false)
        }) {
            let (_, value) = entry.map_err(|e| Error::Store(format!("range scan failed: {e}")))?;
            samples.push(serde_json::from_slice(&value)?);
        }
        Ok(samples)
    }

    /// Union across all metric types for one service, sorted ascending by timestamp — used by the
    /// Analyzer tick.
    pub fn range_samples_any_type(&self, service: &str, window: Duration) -> Result<Vec<MetricSample>> {
        let cutoff = cutoff_nanos(window);
        let prefix = format!("{service}\0").into_bytes();
        let mut samples = Vec::new();
        for entry in self.windows.scan_prefix(&prefix) {
            let (_, value) = entry.map_err(|e| Error::Store(format!("range scan failed: {e}")))?;
            let sample: MetricSample = serde_json::from_slice(&value)?;
            if sample.score_nanos() >= cutoff {
                samples.push(sample);
            }
        }
        samples.sort_by_key(|s| s.score_nanos());
        Ok(samples)
    }

    /// Returns the most recent composite sample for a service: the
    /// per-type "latest" pointers merged into one record whose timestamp
    /// is the *maximum* of the contributing timestamps.
    pub fn latest_composite(&self, service: &str, types: &[MetricType]) -> Result<Option<MetricSample>> {
        let mut merged: Option<MetricSample> = None;
        let now = Utc::now();
        for &metric_type in types {
            let Some(bytes) = self
                .latest
                .get(latest_key(service, metric_type))
                .map_err(|e| Error::Store(format!("latest lookup failed: {e}")))?
            else {
                continue;
            };
            let entry: LatestEntry = serde_json::from_slice(&bytes)?;
            if entry.expires_at <= now {
                continue;
            }
            merged = Some(merge_latest(merged, entry.sample));
        }
        Ok(merged)
    }

    /// Deletes samples older than `retention`; never touches "latest"
    /// pointer keys, which live in a separate tree.
    pub fn cleanup_expired_samples(&self, retention: Duration) -> Result<u64> {
        let cutoff = cutoff_nanos(retention);
        let mut deleted = 0u64;
        let mut to_remove = Vec::new();
        for entry in self.windows.iter() {
            let (key, _) = entry.map_err(|e| Error::Store(format!("cleanup scan failed: {e}")))?;
            if let Some(score) = parse_score(&key) {
                if score < cutoff {
                    to_remove.push(key);
                }
            }
        }
        for key in to_remove {
            self.windows
                .remove(key)
                .map_err(|e| Error::Store(format!("cleanup delete failed: {e}")))?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

fn cutoff_nanos(window: Duration) -> i64 {
    let now_nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    now_nanos.saturating_sub(window.as_nanos() as i64)
}

fn parse_score(key: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(key).ok()?;
    let mut parts = text.split('\0');
    let _service = parts.next()?;
    let _metric_type = parts.next()?;
    let score = parts.next()?;
    score.parse::<i64>().ok()
}

/// Merges a new per-type latest sample into the running composite,
/// keeping whichever timestamp is newer and layering the pre-aggregated
/// fields from both.
fn merge_latest(existing: Option<MetricSample>, incoming: MetricSample) -> MetricSample {
    match existing {
        None => incoming,
        Some(mut current) => {
            if incoming.timestamp > current.timestamp {
                current.timestamp = incoming.timestamp;
            }
            current.cpu_usage = current.cpu_usage.or(incoming.cpu_usage);
            current.memory_usage = current.memory_usage.or(incoming.memory_usage);
            current.latency_p50 = current.latency_p50.or(incoming.latency_p50);
            current.latency_p95 = current.latency_p95.or(incoming.latency_p95);
            current.latency_p99 = current.latency_p99.or(incoming.latency_p99);
            current.error_rate = current.error_rate.or(incoming.error_rate);
            current.request_count = current.request_count.or(incoming.request_count);
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn sample(service: &str, metric_type: MetricType, value: f64, ts: DateTime<Utc>) -> MetricSample {
        MetricSample {
            id: uuid::Uuid::new_v4().to_string(),
            service: service.to_string(),
            metric_type,
            value,
            unit: "percent".to_string(),
            timestamp: ts,
            labels: HashMap::new(),
            trace_id: None,
            span_id: None,
            cpu_usage: Some(value),
            memory_usage: None,
            latency_p50: None,
            latency_p95: None,
            latency_p99: None,
            error_rate: None,
            request_count: None,
        }
    }

    #[test]
    fn range_returns_ascending_by_timestamp_regardless_of_append_order() {
        let (_dir, store) = store();
        let base = Utc::now();
        let later = sample("auth", MetricType::Cpu, 90.0, base + chrono::Duration::seconds(5));
        let earlier = sample("auth", MetricType::Cpu, 70.0, base);
        // Append out of order.
        store.append_sample(&later, Duration::from_secs(600)).unwrap();
        store.append_sample(&earlier, Duration::from_secs(600)).unwrap();

        let results = store
            .range_samples("auth", MetricType::Cpu, Duration::from_secs(3600))
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].timestamp <= results[1].timestamp);
    }

    #[test]
    fn duplicate_append_is_idempotent() {
        let (_dir, store) = store();
        let s = sample("auth", MetricType::Cpu, 70.0, Utc::now());
        store.append_sample(&s, Duration::from_secs(600)).unwrap();
        store.append_sample(&s, Duration::from_secs(600)).unwrap();
        let results = store
            .range_samples("auth", MetricType::Cpu, Duration::from_secs(3600))
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn cleanup_respects_retention_and_preserves_latest_pointer() {
        let (_dir, store) = store();
        let old = sample(
            "auth",
            MetricType::Cpu,
            10.0,
            Utc::now() - chrono::Duration::hours(2),
        );
        let fresh = sample("auth", MetricType::Cpu, 20.0, Utc::now());
        store.append_sample(&old, Duration::from_secs(600)).unwrap();
        store.append_sample(&fresh, Duration::from_secs(600)).unwrap();

        store.cleanup_expired_samples(Duration::from_secs(3600)).unwrap();

        let results = store
            .range_samples("auth", MetricType::Cpu, Duration::from_secs(7200))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 20.0);

        let latest = store
            .latest_composite("auth", &[MetricType::Cpu])
            .unwrap()
            .expect("latest pointer must survive cleanup");
        assert_eq!(latest.cpu_usage, Some(20.0));
    }

    #[test]
    fn range_any_type_unions_and_sorts_across_types() {
        let (_dir, store) = store();
        let base = Utc::now();
        store
            .append_sample(&sample("auth", MetricType::Cpu, 70.0, base), Duration::from_secs(600))
            .unwrap();
        store
            .append_sample(
                &sample("auth", MetricType::Memory, 50.0, base + chrono::Duration::seconds(1)),
                Duration::from_secs(600),
            )
            .unwrap();

        let merged = store
            .range_samples_any_type("auth", Duration::from_secs(3600))
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged[0].timestamp <= merged[1].timestamp);
    }

    #[test]
    fn latest_composite_timestamp_is_max_of_contributors() {
        let (_dir, store) = store();
        let base = Utc::now();
        let cpu = sample("auth", MetricType::Cpu, 10.0, base);
        let mem = sample("auth", MetricType::Memory, 20.0, base + chrono::Duration::seconds(30));
        store.append_sample(&cpu, Duration::from_secs(600)).unwrap();
        store.append_sample(&mem, Duration::from_secs(600)).unwrap();

        let composite = store
            .latest_composite("auth", &[MetricType::Cpu, MetricType::Memory])
            .unwrap()
            .unwrap();
        assert_eq!(composite.timestamp, mem.timestamp);
        assert_eq!(composite.cpu_usage, Some(10.0));
        assert_eq!(composite.memory_usage, Some(20.0));
    }
}
