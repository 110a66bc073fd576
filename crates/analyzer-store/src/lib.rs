//! State store client.
//!
//! Backed by `sled`, an embedded KV store; the zero-padded lexicographic
//! key trick (see `window.rs`) turns `sled`'s natural byte ordering into
//! score-ordered metric windows, a rule registry, an alert journal, and
//! the dedup/cooldown/suppression TTL keys.
//!
//! All operations are single round-trip `sled` calls (get/insert/CAS/scan),
//! so correctness derives from per-key atomicity plus idempotent
//! appenders rather than multi-key transactions.

pub mod journal;
pub mod rules;
pub mod ttl;
pub mod window;

use analyzer_common::error::{Error, Result};
use std::path::Path;

/// Handle to every `sled` tree the pipeline's state lives in.
pub struct StateStore {
    pub(crate) db: sled::Db,
    pub(crate) rules: sled::Tree,
    pub(crate) windows: sled::Tree,
    pub(crate) latest: sled::Tree,
    pub(crate) journal: sled::Tree,
    pub(crate) by_id: sled::Tree,
    pub(crate) ttl: sled::Tree,
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| Error::Store(format!("failed to open state store: {e}")))?;
        Ok(Self {
            rules: open_tree(&db, "rules")?,
            windows: open_tree(&db, "metrics:windows")?,
            latest: open_tree(&db, "metrics:latest")?,
            journal: open_tree(&db, "alerts:journal")?,
            by_id: open_tree(&db, "alerts:by_id")?,
            ttl: open_tree(&db, "ttl")?,
            db,
        })
    }

    /// Flushes all trees to disk. Not required for correctness (sled
    /// fsyncs on its own schedule) but useful before a clean shutdown.
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| Error::Store(format!("flush failed: {e}")))?;
        Ok(())
    }
}

fn open_tree(db: &sled::Db, name: &str) -> Result<sled::Tree> {
    db.open_tree(name)
        .map_err(|e| Error::Store(format!("failed to open tree {name}: {e}")))
}

/// Current wall-clock time as a `chrono::DateTime<Utc>`. Centralized so
/// tests can reason about it; not mockable, since only TTL/ordering
/// correctness depends on it, not deterministic clocks.
pub(crate) fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
