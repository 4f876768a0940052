// src/pipeline/coordinator.rs

//! The indexing coordinator: a bounded worker pool driving pending files
//! through parse, fan-out, and submission, advancing each file's state.
//!
//! Each worker's pass over one container is blocking and runs under
//! `spawn_blocking`; the fan-out across files is bounded with
//! `buffer_unordered`. The coordinator exits once a fetch of pending files
//! returns empty, so it is designed to be re-invoked from a timer rather
//! than to run forever.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::archive::ArchiveReader;
use crate::cdx::RecordBuilder;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{ArchivedFile, Collection, FileStats, IndexRecord};
use crate::pipeline::buffer::CollectionBuffer;
use crate::storage::MetadataStore;

/// Totals for one coordinator invocation.
#[derive(Debug, Default)]
pub struct IndexSummary {
    /// Files advanced to CdxIndexed
    pub indexed: usize,
    /// Files advanced to CdxError (unreadable containers)
    pub errored: usize,
    /// Files left Imported for retry next pass
    pub failed: usize,
    /// Files skipped because another worker held the lock
    pub skipped: usize,
    /// Capture records across all indexed files
    pub records: u64,
}

enum FileOutcome {
    Indexed(u64),
    Errored,
    Failed,
    Skipped,
}

/// Bounded worker pool over pending archive files.
pub struct Coordinator {
    store: Arc<dyn MetadataStore>,
    client: reqwest::Client,
    workers: usize,
    batch_size: usize,
}

impl Coordinator {
    pub fn new(store: Arc<dyn MetadataStore>, config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.submit.user_agent)
            .timeout(Duration::from_secs(config.submit.timeout_secs))
            .build()?;
        Ok(Self {
            store,
            client,
            workers: config.indexer.effective_workers(),
            batch_size: config.indexer.batch_size,
        })
    }

    /// Drain the pending files, batch by batch.
    pub async fn run(&self) -> Result<IndexSummary> {
        let mut summary = IndexSummary::default();

        loop {
            let batch = self.store.pending_files(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            let collections = self.store.collections().await?;
            log::info!(
                "indexing batch of {} files across {} collections with {} workers",
                batch.len(),
                collections.len(),
                self.workers
            );

            let outcomes: Vec<FileOutcome> = stream::iter(batch)
                .map(|file| self.process_file(file, &collections))
                .buffer_unordered(self.workers)
                .collect()
                .await;

            let mut progressed = false;
            for outcome in outcomes {
                match outcome {
                    FileOutcome::Indexed(records) => {
                        summary.indexed += 1;
                        summary.records += records;
                        progressed = true;
                    }
                    FileOutcome::Errored => {
                        summary.errored += 1;
                        progressed = true;
                    }
                    FileOutcome::Failed => summary.failed += 1,
                    FileOutcome::Skipped => summary.skipped += 1,
                }
            }
            // Nothing advanced: every file is locked elsewhere or failing.
            // Leave the remainder for the next timer invocation.
            if !progressed {
                break;
            }
        }

        log::info!(
            "indexing pass complete: {} indexed, {} errored, {} failed, {} skipped, {} records",
            summary.indexed,
            summary.errored,
            summary.failed,
            summary.skipped,
            summary.records
        );
        Ok(summary)
    }

    /// Process one file under its exclusive lock.
    async fn process_file(&self, file: ArchivedFile, collections: &[Collection]) -> FileOutcome {
        match self.store.try_lock(file.id).await {
            Ok(true) => {}
            Ok(false) => {
                // Another worker holds the file; not an error.
                log::debug!("file {} is locked elsewhere, skipping", file.id);
                return FileOutcome::Skipped;
            }
            Err(e) => {
                log::error!("lock acquisition for file {} failed: {e}", file.id);
                return FileOutcome::Failed;
            }
        }

        let outcome = self.index_file(&file, collections).await;
        if let Err(e) = self.store.release_lock(file.id).await {
            log::warn!("releasing lock for file {} failed: {e}", file.id);
        }

        match outcome {
            Ok(records) => FileOutcome::Indexed(records),
            Err(AppError::CorruptContainer { path, message }) => {
                log::error!("container {path} unreadable: {message}");
                match self.store.mark_error(file.id).await {
                    Ok(()) => FileOutcome::Errored,
                    Err(e) => {
                        log::error!("marking file {} errored failed: {e}", file.id);
                        FileOutcome::Failed
                    }
                }
            }
            Err(e) => {
                log::warn!("indexing {} failed, will retry next pass: {e}", file.filename());
                FileOutcome::Failed
            }
        }
    }

    /// One pass: parse the container into per-collection buffers, submit
    /// them all, then record the success transactionally.
    async fn index_file(&self, file: &ArchivedFile, collections: &[Collection]) -> Result<u64> {
        let path = PathBuf::from(&file.path);
        let filename = file.filename().to_string();
        let collections = collections.to_vec();

        let (buffers, stats) =
            tokio::task::spawn_blocking(move || fill_buffers(&path, &filename, collections))
                .await
                .map_err(|e| AppError::store(format!("indexing worker panicked: {e}")))??;

        // Submit every buffer even after one fails; a single failure still
        // fails the file so it is retried wholesale next pass.
        let mut per_collection = Vec::new();
        let mut failure: Option<AppError> = None;
        for mut buffer in buffers {
            match buffer.submit(&self.client).await {
                Ok(collection_stats) => {
                    per_collection.push((buffer.name().to_string(), collection_stats));
                }
                Err(e) => {
                    log::warn!("{e}");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        self.store
            .record_success(file.id, &stats, &per_collection)
            .await?;
        log::info!(
            "indexed {}: {} records, {} bytes",
            file.filename(),
            stats.records,
            stats.record_bytes
        );
        Ok(stats.records)
    }
}

/// Blocking pass over one container: open buffers, build records, fan out.
///
/// Capture lengths come from diffing consecutive record offsets; the
/// container's total length closes the last record.
fn fill_buffers(
    path: &Path,
    filename: &str,
    collections: Vec<Collection>,
) -> Result<(Vec<CollectionBuffer>, FileStats)> {
    let mut buffers = collections
        .into_iter()
        .map(CollectionBuffer::new)
        .collect::<Result<Vec<_>>>()?;

    let mut reader = ArchiveReader::open(path)?;
    let total_len = reader.total_len();
    let builder = RecordBuilder::new(filename);
    let mut stats = FileStats::default();
    let mut pending: Option<(Vec<IndexRecord>, u64)> = None;

    loop {
        match reader.next_record() {
            Some(Ok(record)) => {
                let offset = record.offset;
                if let Some((records, start)) = pending.take() {
                    fan_out(records, start, offset, &mut buffers, &mut stats)?;
                }
                pending = Some((builder.build(&record), offset));
            }
            Some(Err(e @ AppError::CorruptContainer { .. })) => return Err(e),
            Some(Err(e)) => {
                // Records read so far stay indexed; the tail is lost.
                log::warn!("record parse failed mid-container: {e}");
                break;
            }
            None => break,
        }
    }
    if let Some((records, start)) = pending.take() {
        fan_out(records, start, total_len, &mut buffers, &mut stats)?;
    }

    Ok((buffers, stats))
}

/// Patch lengths into one archive record's index entries and append them to
/// every buffer.
fn fan_out(
    records: Vec<IndexRecord>,
    start: u64,
    end: u64,
    buffers: &mut [CollectionBuffer],
    stats: &mut FileStats,
) -> Result<()> {
    let length = end.saturating_sub(start);
    for mut record in records {
        match record {
            IndexRecord::Capture(ref mut capture) => {
                capture.length = length;
                stats.observe(capture.timestamp, length);
            }
            IndexRecord::Alias { .. } => {
                stats.records += 1;
            }
        }
        for buffer in buffers.iter_mut() {
            buffer.append(&record)?;
        }
    }
    Ok(())
}
