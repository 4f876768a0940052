//! Archived file state and statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of an archived container file.
///
/// Transitions are monotonic except `Open -> Imported` (the file may still
/// grow while open) and any state -> error (terminal until manual reset).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileState {
    /// Still being written by the crawler
    Open,
    /// Fully imported, waiting for CDX indexing
    Imported,
    /// CDX index lines submitted to every destination collection
    CdxIndexed,
    /// Container could not be opened or indexed; needs manual reset
    CdxError,
    /// Full-text indexing finished (downstream of CdxIndexed)
    SolrIndexed,
    /// Full-text indexing failed; needs manual reset
    SolrError,
    /// Removed from disk
    Deleted,
}

impl FileState {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Open, Imported)
                | (Imported, CdxIndexed)
                | (Imported, CdxError)
                | (CdxIndexed, SolrIndexed)
                | (CdxIndexed, SolrError)
                | (CdxError, Imported)   // manual reset
                | (SolrError, CdxIndexed) // manual reset
                | (_, Deleted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileState::Open => "open",
            FileState::Imported => "imported",
            FileState::CdxIndexed => "cdx-indexed",
            FileState::CdxError => "cdx-error",
            FileState::SolrIndexed => "solr-indexed",
            FileState::SolrError => "solr-error",
            FileState::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An archive container file known to the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedFile {
    /// Store-assigned identifier
    pub id: u64,

    /// Owning crawl
    pub crawl_id: u64,

    /// Owning crawl series
    pub series_id: u64,

    /// Filesystem location of the container
    pub path: String,

    /// Declared size in bytes
    pub size: u64,

    /// Content digest of the whole container, if recorded at import
    pub digest: Option<String>,

    /// Current processing state
    pub state: FileState,
}

impl ArchivedFile {
    /// Filename component used in CDX lines, falling back to the full path.
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// One entry in a file's append-only state history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub file_id: u64,
    pub from: FileState,
    pub to: FileState,
    pub at: DateTime<Utc>,
}

/// Aggregate statistics for one indexed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileStats {
    /// Captures indexed
    pub records: u64,
    /// Sum of compressed record lengths
    pub record_bytes: u64,
    /// Earliest capture timestamp seen
    pub earliest: Option<DateTime<Utc>>,
    /// Latest capture timestamp seen
    pub latest: Option<DateTime<Utc>>,
}

impl FileStats {
    /// Fold one capture into the running aggregate.
    pub fn observe(&mut self, timestamp: DateTime<Utc>, length: u64) {
        self.records += 1;
        self.record_bytes += length;
        if self.earliest.is_none_or(|t| timestamp < t) {
            self.earliest = Some(timestamp);
        }
        if self.latest.is_none_or(|t| timestamp > t) {
            self.latest = Some(timestamp);
        }
    }
}

/// Per-(collection, file) counters used for additive rollups.
///
/// Rollups to collection totals are applied as the *delta* against the
/// previously recorded value for the same (collection, file) pair, so a
/// retried file never double-counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionStats {
    pub records: u64,
    pub record_bytes: u64,
}

impl CollectionStats {
    /// Signed delta from a previous recording of the same pair.
    pub fn delta_from(&self, previous: CollectionStats) -> (i64, i64) {
        (
            self.records as i64 - previous.records as i64,
            self.record_bytes as i64 - previous.record_bytes as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_transitions() {
        assert!(FileState::Open.can_transition(FileState::Imported));
        assert!(FileState::Imported.can_transition(FileState::CdxIndexed));
        assert!(FileState::Imported.can_transition(FileState::CdxError));
        assert!(!FileState::CdxIndexed.can_transition(FileState::Imported));
        assert!(!FileState::Open.can_transition(FileState::CdxIndexed));
        // Manual reset out of the error state
        assert!(FileState::CdxError.can_transition(FileState::Imported));
    }

    #[test]
    fn test_filename() {
        let file = ArchivedFile {
            id: 1,
            crawl_id: 1,
            series_id: 1,
            path: "/warcs/2016/foo.warc.gz".to_string(),
            size: 0,
            digest: None,
            state: FileState::Imported,
        };
        assert_eq!(file.filename(), "foo.warc.gz");
    }

    #[test]
    fn test_stats_observe() {
        let mut stats = FileStats::default();
        let t1 = Utc.with_ymd_and_hms(2016, 8, 21, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2016, 8, 23, 0, 0, 0).unwrap();
        stats.observe(t2, 100);
        stats.observe(t1, 50);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.record_bytes, 150);
        assert_eq!(stats.earliest, Some(t1));
        assert_eq!(stats.latest, Some(t2));
    }

    #[test]
    fn test_collection_delta() {
        let prev = CollectionStats {
            records: 10,
            record_bytes: 1000,
        };
        let curr = CollectionStats {
            records: 12,
            record_bytes: 900,
        };
        assert_eq!(curr.delta_from(prev), (2, -100));
        assert_eq!(curr.delta_from(CollectionStats::default()), (12, 900));
    }
}
