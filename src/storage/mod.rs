// src/storage/mod.rs

//! Metadata store abstractions.
//!
//! The indexer consumes the external metadata store only as a source of
//! archived-file records and a sink for state transitions, aggregate
//! counters, locally persisted rules, and the refresh last-run record.
//! [`LocalStore`] is a JSON-document implementation for development and
//! testing; production deployments wire the relational store behind the
//! same trait.

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ArchivedFile, CdxRule, Collection, CollectionStats, FileStats};
use crate::rules::RulesDiff;

// Re-export for convenience
pub use local::LocalStore;

/// Rollup counters kept per collection, per crawl, and per crawl series.
///
/// Counters are signed because they move by deltas; a shrunken re-index of
/// the same file legitimately subtracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Files contributing to this rollup
    pub files: u64,
    /// Container bytes across those files
    pub file_bytes: u64,
    /// Capture records
    pub records: i64,
    /// Compressed record bytes
    pub record_bytes: i64,
    /// Earliest capture seen
    pub start: Option<DateTime<Utc>>,
    /// Latest capture seen
    pub end: Option<DateTime<Utc>>,
}

impl AggregateStats {
    /// Apply a signed delta and widen the time window.
    pub fn apply(
        &mut self,
        records: i64,
        record_bytes: i64,
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) {
        self.records += records;
        self.record_bytes += record_bytes;
        if let Some(earliest) = earliest {
            if self.start.is_none_or(|s| earliest < s) {
                self.start = Some(earliest);
            }
        }
        if let Some(latest) = latest {
            if self.end.is_none_or(|e| latest > e) {
                self.end = Some(latest);
            }
        }
    }
}

/// Persisted record of the most recent rule refresh cycle.
///
/// Doubles as the mutual-exclusion and crash-recovery mechanism: a run is
/// written incomplete before reprocessing starts, checkpointed after each
/// rule id, and marked complete at the end. On startup an incomplete run
/// forces recovery mode, resuming from the checkpoint instead of
/// restarting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRun {
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub completed: bool,
    /// Last rule id whose reprocessing finished
    pub checkpoint: Option<i64>,
    /// The diff being reprocessed, kept so recovery can resume it
    pub diff: RulesDiff,
}

/// Seam to the external metadata store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Files waiting for CDX indexing (state `Imported`), up to `limit`.
    async fn pending_files(&self, limit: usize) -> Result<Vec<ArchivedFile>>;

    /// Acquire the exclusive per-file processing lock. Returns `false`
    /// when another worker holds it; losing the race is not an error.
    async fn try_lock(&self, file_id: u64) -> Result<bool>;

    /// Release the per-file lock.
    async fn release_lock(&self, file_id: u64) -> Result<()>;

    /// Transition a file to `CdxError` (container unreadable). Terminal
    /// until a manual reset.
    async fn mark_error(&self, file_id: u64) -> Result<()>;

    /// Previously recorded stats for a (collection, file) pair, zero when
    /// the pair was never indexed.
    async fn collection_stats(&self, collection: &str, file_id: u64) -> Result<CollectionStats>;

    /// Record a successful indexing pass: the `Imported -> CdxIndexed`
    /// transition, the file's aggregate stats, and per-collection deltas
    /// rolled up to collection, crawl, and series — all in one logical
    /// update, idempotent on retry.
    async fn record_success(
        &self,
        file_id: u64,
        stats: &FileStats,
        per_collection: &[(String, CollectionStats)],
    ) -> Result<()>;

    /// Destination collections, in configuration order.
    async fn collections(&self) -> Result<Vec<Collection>>;

    /// The locally persisted rule snapshot.
    async fn load_rules(&self) -> Result<Vec<CdxRule>>;

    /// Replace the locally persisted rule snapshot.
    async fn save_rules(&self, rules: &[CdxRule]) -> Result<()>;

    /// The last refresh run record, if any.
    async fn last_run(&self) -> Result<Option<RefreshRun>>;

    /// Persist the refresh run record.
    async fn save_last_run(&self, run: &RefreshRun) -> Result<()>;

    /// Whether the rule engine is locked down after a failed refresh.
    async fn lockdown(&self) -> Result<bool>;

    /// Raise or clear the persisted lockdown flag.
    async fn set_lockdown(&self, on: bool) -> Result<()>;
}
