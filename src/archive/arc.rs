//! Legacy ARC record parsing.
//!
//! An ARC record is a single space-separated URL line
//! (`url ip-address archive-date content-type length`) followed by exactly
//! `length` payload bytes. The container opens with a `filedesc://` version
//! record that describes the file itself.

use std::io::Read;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::archive::record::{ArchiveRecord, RecordKind};
use crate::error::{AppError, Result};

/// Parse one record; the caller has already consumed the URL line.
///
/// Version 2 URL lines carry extra middle fields; the first four and the
/// trailing length are positionally stable across both versions.
pub(super) fn read_record<R: Read>(reader: &mut R, url_line: &str) -> Result<ArchiveRecord> {
    let fields: Vec<&str> = url_line.split(' ').collect();
    if fields.len() < 5 {
        return Err(AppError::validation(format!(
            "ARC URL line has {} fields, expected at least 5",
            fields.len()
        )));
    }

    let url = fields[0].to_string();
    let date = parse_arc_date(fields[2]);
    let content_type = fields[3].to_string();
    let length: u64 = fields[fields.len() - 1]
        .parse()
        .map_err(|_| AppError::validation("ARC URL line has a non-numeric length"))?;

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;

    let kind = if url.starts_with("filedesc://") {
        RecordKind::Filedesc
    } else {
        RecordKind::Response
    };

    // Surface the line's content type as a header so the record builder
    // reads ARC and WARC records uniformly.
    let headers = vec![("Content-Type".to_string(), content_type)];

    Ok(ArchiveRecord::new(kind, Some(url), date, headers, payload))
}

/// 14-digit `YYYYMMDDHHMMSS` archive date.
fn parse_arc_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_read_v1_record() {
        let body = b"HTTP/1.0 200 OK\r\n\r\nhi";
        let line = format!(
            "http://example.org/ 10.0.0.1 20010203040506 text/html {}",
            body.len()
        );
        let record = read_record(&mut body.as_slice(), &line).unwrap();
        assert_eq!(record.kind, RecordKind::Response);
        assert_eq!(record.url.as_deref(), Some("http://example.org/"));
        assert_eq!(record.header("content-type"), Some("text/html"));
        assert_eq!(
            record.date,
            Some(Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap())
        );
        assert_eq!(record.payload, body);
    }

    #[test]
    fn test_filedesc_is_version_record() {
        let body = b"1 0 InternetArchive";
        let line = format!(
            "filedesc://IA-001.arc 0.0.0.0 19960923142103 text/plain {}",
            body.len()
        );
        let record = read_record(&mut body.as_slice(), &line).unwrap();
        assert_eq!(record.kind, RecordKind::Filedesc);
    }

    #[test]
    fn test_v2_line_takes_trailing_length() {
        let body = b"x";
        let line = "http://example.org/ 10.0.0.1 20010203040506 text/html 200 checksum - 0 f.arc 1";
        let record = read_record(&mut body.as_slice(), line).unwrap();
        assert_eq!(record.payload, b"x");
    }

    #[test]
    fn test_short_line_is_error() {
        let mut empty: &[u8] = &[];
        assert!(read_record(&mut empty, "http://example.org/ 10.0.0.1").is_err());
    }
}
