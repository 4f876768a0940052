//! Logical archive records yielded by the container reader.

use chrono::{DateTime, Utc};

/// Record type tag, normalized across container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A captured network response
    Response,
    /// A directly stored resource (no protocol exchange)
    Resource,
    /// The request side of an exchange
    Request,
    /// Metadata about another record
    Metadata,
    /// Container self-description (`warcinfo`, legacy ARC `filedesc://`)
    Filedesc,
    /// Deduplicated re-capture pointer
    Revisit,
    /// Anything else
    Other,
}

/// One logical record read from an archive container.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub kind: RecordKind,

    /// Target URL; absent for non-resource records
    pub url: Option<String>,

    /// Capture instant from the record header
    pub date: Option<DateTime<Utc>>,

    /// Raw header fields in container order
    headers: Vec<(String, String)>,

    /// Full payload block
    pub payload: Vec<u8>,

    /// Byte offset of the record's start in the (compressed) container
    pub offset: u64,
}

impl ArchiveRecord {
    pub fn new(
        kind: RecordKind,
        url: Option<String>,
        date: Option<DateTime<Utc>>,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            url,
            date,
            headers,
            payload,
            offset: 0,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_case_insensitive() {
        let record = ArchiveRecord::new(
            RecordKind::Response,
            Some("http://example.org/".to_string()),
            None,
            vec![("Content-Type".to_string(), "text/html".to_string())],
            Vec::new(),
        );
        assert_eq!(record.header("content-type"), Some("text/html"));
        assert_eq!(record.header("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(record.header("missing"), None);
    }
}
