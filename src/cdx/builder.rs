// src/cdx/builder.rs

//! Translation of archive records into typed index entries.
//!
//! Response records and http(s) resource records yield one [`Capture`] each;
//! a legacy redirect-map resource yields a stream of [`IndexRecord::Alias`]
//! entries instead. Pseudo-records (`dns:`, `whois:`, requests, metadata)
//! and records without a parseable HTTP status line are dropped silently —
//! a dropped record never fails the file.

use sha1::{Digest, Sha1};

use crate::archive::{ArchiveRecord, RecordKind};
use crate::cdx::canonical;
use crate::models::{Capture, IndexRecord};

/// Suffix identifying a legacy redirect-map resource.
const ALIAS_MAP_SUFFIX: &str = "/url.map";

/// Separator between the path and target halves of a redirect-map line.
const ALIAS_SEPARATOR: &str = "^^";

/// Builds index entries for the records of one container file.
pub struct RecordBuilder {
    filename: String,
}

impl RecordBuilder {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }

    /// Build the index entries for one record.
    ///
    /// An empty vec means the record is skipped, not an error. Capture
    /// lengths are left at zero; the pipeline fills them once the next
    /// record's offset is known.
    pub fn build(&self, record: &ArchiveRecord) -> Vec<IndexRecord> {
        let Some(url) = record.url.as_deref() else {
            return Vec::new();
        };
        if !has_web_scheme(url) {
            return Vec::new();
        }

        match record.kind {
            RecordKind::Response => {
                if url.ends_with(ALIAS_MAP_SUFFIX) {
                    let Some(http) = parse_http(&record.payload) else {
                        return Vec::new();
                    };
                    return build_aliases(url, &record.payload[http.body_offset..]);
                }
                self.build_response(record, url)
            }
            RecordKind::Resource => {
                if url.ends_with(ALIAS_MAP_SUFFIX) {
                    return build_aliases(url, &record.payload);
                }
                self.build_resource(record, url)
            }
            _ => Vec::new(),
        }
    }

    fn build_response(&self, record: &ArchiveRecord, url: &str) -> Vec<IndexRecord> {
        // No parseable status line: silently dropped from the index.
        let Some(http) = parse_http(&record.payload) else {
            return Vec::new();
        };
        let Some(timestamp) = record.date else {
            return Vec::new();
        };

        let digest = stored_digest(record)
            .unwrap_or_else(|| compute_digest(&record.payload[http.body_offset..]));
        let redirect = http
            .location
            .as_deref()
            .map(|location| resolve_location(url, location));

        vec![IndexRecord::Capture(Capture {
            url: canonical::canonicalize(url),
            surt: canonical::to_surt(url),
            timestamp,
            status: Some(http.status),
            content_type: http.content_type.as_deref().map(normalize_content_type),
            digest: Some(digest),
            redirect,
            offset: record.offset,
            length: 0,
            filename: self.filename.clone(),
        })]
    }

    fn build_resource(&self, record: &ArchiveRecord, url: &str) -> Vec<IndexRecord> {
        let Some(timestamp) = record.date else {
            return Vec::new();
        };
        let digest = stored_digest(record).unwrap_or_else(|| compute_digest(&record.payload));

        vec![IndexRecord::Capture(Capture {
            url: canonical::canonicalize(url),
            surt: canonical::to_surt(url),
            timestamp,
            status: None,
            content_type: record.header("Content-Type").map(normalize_content_type),
            digest: Some(digest),
            redirect: None,
            offset: record.offset,
            length: 0,
            filename: self.filename.clone(),
        })]
    }
}

/// Only plain web URLs are indexable; `dns:`, `whois:`, `filedesc:` and
/// other pseudo-schemes are skipped.
fn has_web_scheme(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Parse each `httrack-path^^target-url` line of a redirect map, rewriting
/// the path relative to the map's instance directory.
fn build_aliases(map_url: &str, body: &[u8]) -> Vec<IndexRecord> {
    let instance_dir = &map_url[..map_url.len() - (ALIAS_MAP_SUFFIX.len() - 1)];
    let text = String::from_utf8_lossy(body);
    let mut aliases = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        let Some((path, target)) = line.split_once(ALIAS_SEPARATOR) else {
            continue;
        };
        let path = path.trim().trim_start_matches("./").trim_start_matches('/');
        let target = target.trim();
        if path.is_empty() || target.is_empty() {
            continue;
        }

        let alias = format!("{instance_dir}{path}");
        // A map entry pointing back at itself would alias a URL to its own
        // capture; drop it instead.
        if canonical::canonicalize(&alias) == canonical::canonicalize(target) {
            continue;
        }
        aliases.push(IndexRecord::Alias {
            alias: alias.clone(),
            target: target.to_string(),
        });

        // An index.html entry also aliases its bare directory form.
        if let Some(dir) = alias.strip_suffix("index.html") {
            if dir.ends_with('/') && canonical::canonicalize(dir) != canonical::canonicalize(target)
            {
                aliases.push(IndexRecord::Alias {
                    alias: dir.to_string(),
                    target: target.to_string(),
                });
            }
        }
    }
    aliases
}

struct HttpInfo {
    status: u16,
    content_type: Option<String>,
    location: Option<String>,
    body_offset: usize,
}

/// Parse the HTTP status line and headers from the payload prefix.
///
/// Returns `None` when there is no well-formed status line.
fn parse_http(payload: &[u8]) -> Option<HttpInfo> {
    let (head, body_offset) = split_head(payload)?;
    let head = String::from_utf8_lossy(head);
    let mut lines = head.lines();

    let status_line = lines.next()?;
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let status: u16 = parts.next()?.parse().ok()?;

    let mut content_type = None;
    let mut location = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            } else if name.trim().eq_ignore_ascii_case("location") {
                location = Some(value.trim().to_string());
            }
        }
    }

    Some(HttpInfo {
        status,
        content_type,
        location,
        body_offset,
    })
}

/// Split the HTTP head from the body at the first blank line.
fn split_head(payload: &[u8]) -> Option<(&[u8], usize)> {
    if let Some(idx) = find(payload, b"\r\n\r\n") {
        return Some((&payload[..idx], idx + 4));
    }
    if let Some(idx) = find(payload, b"\n\n") {
        return Some((&payload[..idx], idx + 2));
    }
    // Headers with no body at all still index.
    Some((payload, payload.len()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Normalize a content type: strip parameters and map known aliases.
fn normalize_content_type(raw: &str) -> String {
    let base = raw
        .split(';')
        .next()
        .unwrap_or(raw)
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "application/xhtml+xml" | "text/x-html" => "text/html".to_string(),
        _ => base,
    }
}

/// Stored payload digest with its algorithm prefix stripped.
fn stored_digest(record: &ArchiveRecord) -> Option<String> {
    record.header("WARC-Payload-Digest").map(|digest| {
        digest
            .split_once(':')
            .map_or(digest, |(_, value)| value)
            .to_string()
    })
}

fn compute_digest(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Resolve a Location header value against the capture URL.
fn resolve_location(base: &str, location: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(location)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => location.to_string(),
    }
}
