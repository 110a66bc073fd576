//! Append ordering property: for any sequence of MetricSamples appended
//! to one window, a subsequent range read returns them in non-decreasing
//! timestamp order regardless of append order.

use analyzer_common::types::{MetricSample, MetricType};
use analyzer_store::StateStore;
use chrono::Utc;
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

fn sample_at(base: chrono::DateTime<Utc>, offset_secs: i64, value: f64) -> MetricSample {
    MetricSample {
        id: uuid::Uuid::new_v4().to_string(),
        service: "auth".to_string(),
        metric_type: MetricType::Cpu,
        value,
        unit: "percent".to_string(),
        timestamp: base + chrono::Duration::seconds(offset_secs),
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

proptest! {
    #[test]
    fn range_read_is_ascending_regardless_of_append_order(
        mut offsets in prop::collection::vec(0i64..100_000, 1..40),
        seed in any::<u64>(),
    ) {
        offsets.sort_unstable();
        offsets.dedup();
        let base = Utc::now() - chrono::Duration::seconds(100_000);
        let samples: Vec<MetricSample> = offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| sample_at(base, offset, i as f64))
            .collect();

        // Deterministically shuffle the append order from the seed so the
        // property is reproducible across proptest shrinking.
        let mut shuffled = samples.clone();
        let mut rng_state = seed;
        for i in (1..shuffled.len()).rev() {
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let j = (rng_state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }

        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        for sample in &shuffled {
            store.append_sample(sample, Duration::from_secs(600)).unwrap();
        }

        let results = store
            .range_samples("auth", MetricType::Cpu, Duration::from_secs(200_000))
            .unwrap();
        prop_assert_eq!(results.len(), samples.len());
        for pair in results.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
