//! Typed index entries produced by the CDX record builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the capture index.
///
/// Either a capture of stored content, or an alias mapping one URL to
/// another (legacy redirect maps). Immutable once built; each interested
/// collection buffer consumes it once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexRecord {
    Capture(Capture),
    Alias { alias: String, target: String },
}

impl IndexRecord {
    /// The sort key used against collection URL filters.
    ///
    /// Aliases carry no SURT; they are accepted by every interested buffer.
    pub fn surt(&self) -> Option<&str> {
        match self {
            IndexRecord::Capture(capture) => Some(&capture.surt),
            IndexRecord::Alias { .. } => None,
        }
    }
}

/// A single capture: url + timestamp mapped to its location in a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capture {
    /// Canonicalized URL
    pub url: String,

    /// Sort-friendly form of the URL
    pub surt: String,

    /// Capture instant
    pub timestamp: DateTime<Utc>,

    /// HTTP status, when the record carried a parseable status line
    pub status: Option<u16>,

    /// Normalized content type, parameters stripped
    pub content_type: Option<String>,

    /// Payload digest (stored header value, or computed SHA-1)
    pub digest: Option<String>,

    /// Redirect target from the Location header, resolved absolute
    pub redirect: Option<String>,

    /// Byte offset of the record in the container
    pub offset: u64,

    /// Compressed length on disk
    pub length: u64,

    /// Container filename
    pub filename: String,
}
