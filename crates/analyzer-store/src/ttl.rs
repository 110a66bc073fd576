//! Dedup, cooldown and suppression TTL entries.
//!
//! `sled` has no native key expiry, so every entry stores its own expiry
//! timestamp and is treated as absent once that has passed — an
//! explicit-expiry-timestamp cache entry, here backed by `sled` instead
//! of an in-process map.

use analyzer_common::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::StateStore;

#[derive(Serialize, Deserialize)]
struct TtlEntry {
    expires_at: DateTime<Utc>,
}

fn encode(ttl: Duration) -> Result<Vec<u8>> {
    let entry = TtlEntry {
        expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
    };
    Ok(serde_json::to_vec(&entry)?)
}

fn is_live(bytes: &[u8]) -> bool {
    match serde_json::from_slice::<TtlEntry>(bytes) {
        Ok(entry) => entry.expires_at > Utc::now(),
        Err(_) => false,
    }
}

impl StateStore {
    /// Atomic check-and-set: if `key` is absent or expired, sets it with a
    /// fresh TTL and returns `true`. If it is present and unexpired,
    /// leaves it untouched and returns `false`. Used for the dedup key
    /// and, with `try_set_if_absent` reused, the
    /// suppression key.
    pub fn try_set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        loop {
            let current = self
                .ttl
                .get(key.as_bytes())
                .map_err(|e| Error::Store(format!("ttl get failed: {e}")))?;

            let live = current.as_deref().map(is_live).unwrap_or(false);
            if live {
                return Ok(false);
            }

            let new_value = encode(ttl)?;
            let cas = self
                .ttl
                .compare_and_swap(key.as_bytes(), current.as_deref(), Some(new_value))
                .map_err(|e| Error::Store(format!("ttl cas failed: {e}")))?;
            if cas.is_ok() {
                return Ok(true);
            }
            // Lost the race against a concurrent writer; retry.
        }
    }

    /// `true` if `key` is present and unexpired.
    pub fn ttl_exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .ttl
            .get(key.as_bytes())
            .map_err(|e| Error::Store(format!("ttl get failed: {e}")))?
            .map(|bytes| is_live(&bytes))
            .unwrap_or(false))
    }

    /// Unconditionally (re)sets `key` with a fresh TTL, e.g. setting the
    /// cooldown key after a successful alert publish.
    pub fn ttl_set(&self, key: &str, ttl: Duration) -> Result<()> {
        let value = encode(ttl)?;
        self.ttl
            .insert(key.as_bytes(), value)
            .map_err(|e| Error::Store(format!("ttl set failed: {e}")))?;
        Ok(())
    }

    pub fn ttl_delete(&self, key: &str) -> Result<()> {
        self.ttl
            .remove(key.as_bytes())
            .map_err(|e| Error::Store(format!("ttl delete failed: {e}")))?;
        Ok(())
    }

    /// Sweeps every entry under `prefix` whose expiry has passed. Returns
    /// the number removed.
    pub fn ttl_sweep_expired(&self, prefix: &str) -> Result<u64> {
        let mut removed = 0u64;
        let mut stale = Vec::new();
        for entry in self.ttl.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry.map_err(|e| Error::Store(format!("ttl scan failed: {e}")))?;
            if !is_live(&value) {
                stale.push(key);
            }
        }
        for key in stale {
            self.ttl
                .remove(key)
                .map_err(|e| Error::Store(format!("ttl sweep delete failed: {e}")))?;
            removed += 1;
        }
        Ok(removed)
    }
}
