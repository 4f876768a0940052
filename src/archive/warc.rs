//! WARC record parsing.
//!
//! A WARC record is a version line (`WARC/1.0`), named header fields up to a
//! blank line, and a payload of exactly `Content-Length` bytes. In gzipped
//! containers each record is its own gzip member.

use std::io::Read;

use chrono::{DateTime, Utc};

use crate::archive::read_line;
use crate::archive::record::{ArchiveRecord, RecordKind};
use crate::error::{AppError, Result};

/// Parse one record body; the caller has already consumed the version line.
pub(super) fn read_record<R: Read>(reader: &mut R) -> Result<ArchiveRecord> {
    let headers = read_headers(reader)?;

    let length: u64 = header(&headers, "Content-Length")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::validation("WARC record missing Content-Length"))?;

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;

    let kind = match header(&headers, "WARC-Type").unwrap_or("") {
        t if t.eq_ignore_ascii_case("response") => RecordKind::Response,
        t if t.eq_ignore_ascii_case("resource") => RecordKind::Resource,
        t if t.eq_ignore_ascii_case("request") => RecordKind::Request,
        t if t.eq_ignore_ascii_case("metadata") => RecordKind::Metadata,
        t if t.eq_ignore_ascii_case("warcinfo") => RecordKind::Filedesc,
        t if t.eq_ignore_ascii_case("revisit") => RecordKind::Revisit,
        _ => RecordKind::Other,
    };

    // The target URI is sometimes angle-bracketed per early WARC writers.
    let url = header(&headers, "WARC-Target-URI")
        .map(|u| u.trim_start_matches('<').trim_end_matches('>').to_string());

    let date = header(&headers, "WARC-Date")
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc));

    Ok(ArchiveRecord::new(kind, url, date, headers, payload))
}

/// Read `Name: value` fields up to the blank separator line.
fn read_headers<R: Read>(reader: &mut R) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => return Err(AppError::validation("WARC header block truncated")),
        };
        if line.is_empty() {
            return Ok(headers);
        }
        let text = String::from_utf8_lossy(&line);
        if let Some((name, value)) = text.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(warc_type: &str, body: &str) -> Vec<u8> {
        format!(
            "WARC-Type: {}\r\n\
             WARC-Target-URI: http://example.org/\r\n\
             WARC-Date: 2016-08-21T12:00:00Z\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            warc_type,
            body.len(),
            body
        )
        .into_bytes()
    }

    #[test]
    fn test_read_response_record() {
        let bytes = sample_record("response", "HTTP/1.1 200 OK\r\n\r\nhello");
        let record = read_record(&mut bytes.as_slice()).unwrap();
        assert_eq!(record.kind, RecordKind::Response);
        assert_eq!(record.url.as_deref(), Some("http://example.org/"));
        assert!(record.date.is_some());
        assert_eq!(record.payload.len(), 24);
    }

    #[test]
    fn test_bracketed_target_uri() {
        let bytes = "WARC-Type: resource\r\nWARC-Target-URI: <http://example.org/x>\r\nContent-Length: 0\r\n\r\n"
            .as_bytes()
            .to_vec();
        let record = read_record(&mut bytes.as_slice()).unwrap();
        assert_eq!(record.url.as_deref(), Some("http://example.org/x"));
    }

    #[test]
    fn test_missing_content_length_is_error() {
        let bytes = b"WARC-Type: response\r\n\r\n".to_vec();
        assert!(read_record(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let bytes = b"WARC-Type: response\r\nContent-Length: 100\r\n\r\nshort".to_vec();
        assert!(read_record(&mut bytes.as_slice()).is_err());
    }
}
