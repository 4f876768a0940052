//! Local JSON-document store implementation.
//!
//! Keeps every document as pretty-printed JSON under one data directory,
//! written atomically (temp file then rename). Suitable for development and
//! tests; a production deployment implements [`MetadataStore`] over the
//! relational store instead.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── files.json            # ArchivedFile records
//! ├── history.json          # Append-only state transitions
//! ├── collections.json      # Destination collections
//! ├── rules.json            # Local rule snapshot
//! ├── last_run.json         # Refresh last-run record
//! ├── lockdown.json         # Rule engine lockdown flag
//! ├── locks/                # Per-file processing locks
//! │   └── {file_id}.lock
//! └── stats/
//!     ├── files.json        # Per-file aggregates
//!     ├── pairs.json        # Per-(collection, file) counters
//!     ├── collections.json  # Collection rollups
//!     ├── crawls.json       # Crawl rollups
//!     └── series.json       # Series rollups
//! ```

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    ArchivedFile, CdxRule, Collection, CollectionStats, FileState, FileStats, StateTransition,
};
use crate::storage::{AggregateStats, MetadataStore, RefreshRun};

const FILES: &str = "files.json";
const HISTORY: &str = "history.json";
const COLLECTIONS: &str = "collections.json";
const RULES: &str = "rules.json";
const LAST_RUN: &str = "last_run.json";
const LOCKDOWN: &str = "lockdown.json";
const FILE_STATS: &str = "stats/files.json";
const PAIR_STATS: &str = "stats/pairs.json";
const COLLECTION_ROLLUP: &str = "stats/collections.json";
const CRAWL_ROLLUP: &str = "stats/crawls.json";
const SERIES_ROLLUP: &str = "stats/series.json";

/// Local filesystem store backend.
pub struct LocalStore {
    root_dir: PathBuf,
    /// Serializes multi-document updates so each one is a single logical
    /// write from this process's point of view.
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.read_json(key).await?.unwrap_or_default())
    }

    /// Insert or replace a file record (used by seeding and manual resets).
    pub async fn put_file(&self, file: &ArchivedFile) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut files: Vec<ArchivedFile> = self.read_or_default(FILES).await?;
        match files.iter_mut().find(|f| f.id == file.id) {
            Some(existing) => *existing = file.clone(),
            None => files.push(file.clone()),
        }
        self.write_json(FILES, &files).await
    }

    /// Replace the collection list.
    pub async fn save_collections(&self, collections: &[Collection]) -> Result<()> {
        self.write_json(COLLECTIONS, collections).await
    }

    /// All file records.
    pub async fn files(&self) -> Result<Vec<ArchivedFile>> {
        self.read_or_default(FILES).await
    }

    /// The append-only state transition history.
    pub async fn history(&self) -> Result<Vec<StateTransition>> {
        self.read_or_default(HISTORY).await
    }

    /// Rollup for one collection.
    pub async fn collection_rollup(&self, name: &str) -> Result<AggregateStats> {
        let rollups: HashMap<String, AggregateStats> =
            self.read_or_default(COLLECTION_ROLLUP).await?;
        Ok(rollups.get(name).cloned().unwrap_or_default())
    }

    /// Rollup for one crawl series.
    pub async fn series_rollup(&self, series_id: u64) -> Result<AggregateStats> {
        let rollups: HashMap<u64, AggregateStats> = self.read_or_default(SERIES_ROLLUP).await?;
        Ok(rollups.get(&series_id).cloned().unwrap_or_default())
    }

    async fn append_history(&self, file_id: u64, from: FileState, to: FileState) -> Result<()> {
        let mut history: Vec<StateTransition> = self.read_or_default(HISTORY).await?;
        history.push(StateTransition {
            file_id,
            from,
            to,
            at: Utc::now(),
        });
        self.write_json(HISTORY, &history).await
    }
}

#[async_trait]
impl MetadataStore for LocalStore {
    async fn pending_files(&self, limit: usize) -> Result<Vec<ArchivedFile>> {
        let files: Vec<ArchivedFile> = self.read_or_default(FILES).await?;
        Ok(files
            .into_iter()
            .filter(|f| f.state == FileState::Imported)
            .take(limit)
            .collect())
    }

    async fn try_lock(&self, file_id: u64) -> Result<bool> {
        let path = self.path(&format!("locks/{file_id}.lock"));
        self.ensure_dir(&path).await?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_lock(&self, file_id: u64) -> Result<()> {
        let path = self.path(&format!("locks/{file_id}.lock"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_error(&self, file_id: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut files: Vec<ArchivedFile> = self.read_or_default(FILES).await?;
        let file = files
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or_else(|| AppError::store(format!("unknown file {file_id}")))?;

        let from = file.state;
        if !from.can_transition(FileState::CdxError) {
            return Err(AppError::store(format!(
                "illegal transition {from} -> cdx-error for file {file_id}"
            )));
        }
        file.state = FileState::CdxError;
        self.write_json(FILES, &files).await?;
        self.append_history(file_id, from, FileState::CdxError).await
    }

    async fn collection_stats(&self, collection: &str, file_id: u64) -> Result<CollectionStats> {
        let pairs: HashMap<String, CollectionStats> = self.read_or_default(PAIR_STATS).await?;
        Ok(pairs
            .get(&pair_key(collection, file_id))
            .copied()
            .unwrap_or_default())
    }

    async fn record_success(
        &self,
        file_id: u64,
        stats: &FileStats,
        per_collection: &[(String, CollectionStats)],
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut files: Vec<ArchivedFile> = self.read_or_default(FILES).await?;
        let file = files
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or_else(|| AppError::store(format!("unknown file {file_id}")))?;

        if file.state == FileState::CdxIndexed {
            // A retry after a recorded success changes nothing.
            return Ok(());
        }
        let from = file.state;
        if !from.can_transition(FileState::CdxIndexed) {
            return Err(AppError::store(format!(
                "illegal transition {from} -> cdx-indexed for file {file_id}"
            )));
        }
        file.state = FileState::CdxIndexed;
        let crawl_id = file.crawl_id;
        let series_id = file.series_id;
        let file_size = file.size;

        // File-level aggregates move by the delta against any previous
        // recording, so a re-index after a manual reset stays additive.
        let mut file_stats: HashMap<u64, FileStats> = self.read_or_default(FILE_STATS).await?;
        let previous = file_stats.get(&file_id).cloned().unwrap_or_default();
        let first_index = !file_stats.contains_key(&file_id);
        let delta_records = stats.records as i64 - previous.records as i64;
        let delta_bytes = stats.record_bytes as i64 - previous.record_bytes as i64;
        file_stats.insert(file_id, stats.clone());

        let mut crawls: HashMap<u64, AggregateStats> = self.read_or_default(CRAWL_ROLLUP).await?;
        let crawl = crawls.entry(crawl_id).or_default();
        crawl.apply(delta_records, delta_bytes, stats.earliest, stats.latest);
        if first_index {
            crawl.files += 1;
            crawl.file_bytes += file_size;
        }

        let mut series: HashMap<u64, AggregateStats> = self.read_or_default(SERIES_ROLLUP).await?;
        let series_entry = series.entry(series_id).or_default();
        series_entry.apply(delta_records, delta_bytes, stats.earliest, stats.latest);
        if first_index {
            series_entry.files += 1;
            series_entry.file_bytes += file_size;
        }

        let mut pairs: HashMap<String, CollectionStats> = self.read_or_default(PAIR_STATS).await?;
        let mut rollups: HashMap<String, AggregateStats> =
            self.read_or_default(COLLECTION_ROLLUP).await?;
        for (name, current) in per_collection {
            let key = pair_key(name, file_id);
            let previous = pairs.get(&key).copied().unwrap_or_default();
            let (records, bytes) = current.delta_from(previous);
            let rollup = rollups.entry(name.clone()).or_default();
            rollup.apply(records, bytes, stats.earliest, stats.latest);
            if !pairs.contains_key(&key) {
                rollup.files += 1;
                rollup.file_bytes += file_size;
            }
            pairs.insert(key, *current);
        }

        self.write_json(FILES, &files).await?;
        self.write_json(FILE_STATS, &file_stats).await?;
        self.write_json(CRAWL_ROLLUP, &crawls).await?;
        self.write_json(SERIES_ROLLUP, &series).await?;
        self.write_json(PAIR_STATS, &pairs).await?;
        self.write_json(COLLECTION_ROLLUP, &rollups).await?;
        self.append_history(file_id, from, FileState::CdxIndexed)
            .await
    }

    async fn collections(&self) -> Result<Vec<Collection>> {
        self.read_or_default(COLLECTIONS).await
    }

    async fn load_rules(&self) -> Result<Vec<CdxRule>> {
        self.read_or_default(RULES).await
    }

    async fn save_rules(&self, rules: &[CdxRule]) -> Result<()> {
        self.write_json(RULES, rules).await
    }

    async fn last_run(&self) -> Result<Option<RefreshRun>> {
        self.read_json(LAST_RUN).await
    }

    async fn save_last_run(&self, run: &RefreshRun) -> Result<()> {
        self.write_json(LAST_RUN, run).await
    }

    async fn lockdown(&self) -> Result<bool> {
        Ok(self.read_json(LOCKDOWN).await?.unwrap_or(false))
    }

    async fn set_lockdown(&self, on: bool) -> Result<()> {
        self.write_json(LOCKDOWN, &on).await
    }
}

fn pair_key(collection: &str, file_id: u64) -> String {
    format!("{collection}/{file_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_file(id: u64, state: FileState) -> ArchivedFile {
        ArchivedFile {
            id,
            crawl_id: 10,
            series_id: 100,
            path: format!("/warcs/file-{id}.warc.gz"),
            size: 1000,
            digest: None,
            state,
        }
    }

    fn sample_stats(records: u64, bytes: u64) -> FileStats {
        FileStats {
            records,
            record_bytes: bytes,
            earliest: Some(Utc.with_ymd_and_hms(2016, 8, 21, 0, 0, 0).unwrap()),
            latest: Some(Utc.with_ymd_and_hms(2016, 8, 23, 0, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_pending_files_filters_by_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put_file(&sample_file(1, FileState::Imported)).await.unwrap();
        store.put_file(&sample_file(2, FileState::Open)).await.unwrap();
        store.put_file(&sample_file(3, FileState::CdxIndexed)).await.unwrap();

        let pending = store.pending_files(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 1);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(store.try_lock(1).await.unwrap());
        assert!(!store.try_lock(1).await.unwrap());
        store.release_lock(1).await.unwrap();
        assert!(store.try_lock(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_success_transitions_and_rolls_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put_file(&sample_file(1, FileState::Imported)).await.unwrap();

        let stats = sample_stats(20, 4096);
        let per_collection = vec![(
            "web".to_string(),
            CollectionStats {
                records: 15,
                record_bytes: 3000,
            },
        )];
        store.record_success(1, &stats, &per_collection).await.unwrap();

        let files = store.files().await.unwrap();
        assert_eq!(files[0].state, FileState::CdxIndexed);

        let rollup = store.collection_rollup("web").await.unwrap();
        assert_eq!(rollup.files, 1);
        assert_eq!(rollup.records, 15);
        assert_eq!(rollup.record_bytes, 3000);

        let series = store.series_rollup(100).await.unwrap();
        assert_eq!(series.records, 20);
        assert_eq!(series.files, 1);
        assert_eq!(series.file_bytes, 1000);

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, FileState::CdxIndexed);
    }

    #[tokio::test]
    async fn test_record_success_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put_file(&sample_file(1, FileState::Imported)).await.unwrap();

        let stats = sample_stats(20, 4096);
        let per_collection = vec![(
            "web".to_string(),
            CollectionStats {
                records: 20,
                record_bytes: 4096,
            },
        )];
        store.record_success(1, &stats, &per_collection).await.unwrap();
        // A retried success after the transition changes nothing.
        store.record_success(1, &stats, &per_collection).await.unwrap();

        let rollup = store.collection_rollup("web").await.unwrap();
        assert_eq!(rollup.records, 20);
        assert_eq!(rollup.files, 1);
        assert_eq!(store.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reindex_after_reset_applies_delta() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put_file(&sample_file(1, FileState::Imported)).await.unwrap();

        let per_collection = vec![(
            "web".to_string(),
            CollectionStats {
                records: 10,
                record_bytes: 1000,
            },
        )];
        store
            .record_success(1, &sample_stats(10, 1000), &per_collection)
            .await
            .unwrap();

        // Manual reset back to Imported, then a re-index finds more records.
        store.put_file(&sample_file(1, FileState::Imported)).await.unwrap();
        let per_collection = vec![(
            "web".to_string(),
            CollectionStats {
                records: 12,
                record_bytes: 1100,
            },
        )];
        store
            .record_success(1, &sample_stats(12, 1100), &per_collection)
            .await
            .unwrap();

        // Rollups carry the delta, not the sum of both runs.
        let rollup = store.collection_rollup("web").await.unwrap();
        assert_eq!(rollup.records, 12);
        assert_eq!(rollup.record_bytes, 1100);
        assert_eq!(rollup.files, 1);

        let series = store.series_rollup(100).await.unwrap();
        assert_eq!(series.records, 12);
        assert_eq!(series.files, 1);
    }

    #[tokio::test]
    async fn test_mark_error_from_imported_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put_file(&sample_file(1, FileState::Imported)).await.unwrap();
        store.put_file(&sample_file(2, FileState::CdxIndexed)).await.unwrap();

        store.mark_error(1).await.unwrap();
        assert_eq!(store.files().await.unwrap()[0].state, FileState::CdxError);

        assert!(store.mark_error(2).await.is_err());
    }

    #[tokio::test]
    async fn test_rules_and_lockdown_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(store.load_rules().await.unwrap().is_empty());
        assert!(!store.lockdown().await.unwrap());

        store.set_lockdown(true).await.unwrap();
        assert!(store.lockdown().await.unwrap());

        let rules = vec![CdxRule::default_accept()];
        store.save_rules(&rules).await.unwrap();
        assert_eq!(store.load_rules().await.unwrap().len(), 1);
    }
}
