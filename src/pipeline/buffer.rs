// src/pipeline/buffer.rs

//! Per-collection output buffering and bulk submission.
//!
//! One buffer per destination collection is opened before parsing begins.
//! Accepted records are spilled as formatted CDX lines to a private temp
//! file, then submitted in a single streamed POST. The temp file is
//! released on drop, on every exit path.

use std::io::Write;

use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;

use crate::cdx::canonical;
use crate::cdx::format;
use crate::error::{AppError, Result};
use crate::models::{Collection, CollectionStats, IndexRecord};

/// Buffered CDX output for one destination collection.
pub struct CollectionBuffer {
    collection: Collection,
    /// Compiled SURT prefixes; empty accepts every capture
    prefixes: Vec<String>,
    spill: NamedTempFile,
    lines: u64,
    stats: CollectionStats,
}

impl CollectionBuffer {
    pub fn new(collection: Collection) -> Result<Self> {
        let prefixes = collection
            .url_filters
            .iter()
            .map(|filter| compile_filter(filter))
            .collect();
        Ok(Self {
            collection,
            prefixes,
            spill: NamedTempFile::new()?,
            lines: 0,
            stats: CollectionStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.collection.name
    }

    pub fn stats(&self) -> CollectionStats {
        self.stats
    }

    /// Test the record against the prefix allow-list and spill one CDX line
    /// if accepted. Aliases carry no SURT and are always accepted.
    pub fn append(&mut self, record: &IndexRecord) -> Result<()> {
        if !self.accepts(record) {
            return Ok(());
        }
        writeln!(self.spill, "{}", format::render(record))?;
        self.lines += 1;
        self.stats.records += 1;
        if let IndexRecord::Capture(capture) = record {
            self.stats.record_bytes += capture.length;
        }
        Ok(())
    }

    fn accepts(&self, record: &IndexRecord) -> bool {
        match record.surt() {
            None => true,
            Some(surt) => {
                self.prefixes.is_empty()
                    || self.prefixes.iter().any(|prefix| surt.starts_with(prefix))
            }
        }
    }

    /// Submit the whole spill file as one `text/plain` POST.
    ///
    /// A non-200 response surfaces the body's first line as the failure
    /// reason; any failure here fails the whole file's indexing attempt.
    pub async fn submit(&mut self, client: &reqwest::Client) -> Result<CollectionStats> {
        self.spill.flush()?;
        if self.lines == 0 {
            log::debug!("collection '{}': nothing to submit", self.name());
            return Ok(self.stats);
        }

        log::debug!(
            "collection '{}': submitting {} lines to {}",
            self.name(),
            self.lines,
            self.collection.cdx_url
        );

        let file = tokio::fs::File::open(self.spill.path()).await?;
        let header = futures::stream::once(async {
            Ok::<Vec<u8>, std::io::Error>(format!("{}\n", format::CDX_HEADER).into_bytes())
        });
        let spill_stream = futures::stream::unfold(file, |mut file| async move {
            let mut chunk = vec![0u8; 64 * 1024];
            match file.read(&mut chunk).await {
                Ok(0) => None,
                Ok(n) => {
                    chunk.truncate(n);
                    Some((Ok(chunk), file))
                }
                Err(e) => Some((Err(e), file)),
            }
        });
        let body = reqwest::Body::wrap_stream(header.chain(spill_stream));

        let response = client
            .post(&self.collection.cdx_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::submit(self.name(), e))?;

        let status = response.status();
        if status.as_u16() != 200 {
            let body = response.text().await.unwrap_or_default();
            let reason = body.lines().next().unwrap_or("").to_string();
            return Err(AppError::submit(
                self.name(),
                format!("HTTP {status}: {reason}"),
            ));
        }
        Ok(self.stats)
    }
}

/// Compile one collection URL filter into a SURT prefix. A trailing `*` is
/// the explicit prefix marker; a bare pattern already matches everything
/// under it.
fn compile_filter(pattern: &str) -> String {
    let stem = pattern.trim().trim_end_matches('*');
    canonical::to_surt(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Capture;
    use chrono::{TimeZone, Utc};
    use std::io::Read;

    fn make_collection(filters: &[&str]) -> Collection {
        Collection {
            id: 1,
            name: "web".to_string(),
            cdx_url: "http://127.0.0.1:9/web".to_string(),
            solr_url: None,
            url_filters: filters.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn make_capture(url: &str) -> IndexRecord {
        IndexRecord::Capture(Capture {
            url: canonical::canonicalize(url),
            surt: canonical::to_surt(url),
            timestamp: Utc.with_ymd_and_hms(2016, 8, 21, 0, 0, 0).unwrap(),
            status: Some(200),
            content_type: Some("text/html".to_string()),
            digest: Some("abc".to_string()),
            redirect: None,
            offset: 0,
            length: 512,
            filename: "foo.warc.gz".to_string(),
        })
    }

    #[test]
    fn test_no_filters_accepts_all() {
        let mut buffer = CollectionBuffer::new(make_collection(&[])).unwrap();
        buffer.append(&make_capture("http://anything.example.com/")).unwrap();
        assert_eq!(buffer.stats().records, 1);
        assert_eq!(buffer.stats().record_bytes, 512);
    }

    #[test]
    fn test_prefix_filtering() {
        let mut buffer =
            CollectionBuffer::new(make_collection(&["example.org/*"])).unwrap();
        buffer.append(&make_capture("http://example.org/inside")).unwrap();
        buffer.append(&make_capture("http://other.com/outside")).unwrap();
        assert_eq!(buffer.stats().records, 1);
    }

    #[test]
    fn test_aliases_always_accepted() {
        let mut buffer =
            CollectionBuffer::new(make_collection(&["example.org/*"])).unwrap();
        buffer
            .append(&IndexRecord::Alias {
                alias: "http://elsewhere.net/a".to_string(),
                target: "http://elsewhere.net/b".to_string(),
            })
            .unwrap();
        assert_eq!(buffer.stats().records, 1);
        assert_eq!(buffer.stats().record_bytes, 0);
    }

    #[test]
    fn test_spill_contains_rendered_lines() {
        let mut buffer = CollectionBuffer::new(make_collection(&[])).unwrap();
        buffer.append(&make_capture("http://example.org/page")).unwrap();
        buffer.spill.flush().unwrap();

        let mut contents = String::new();
        std::fs::File::open(buffer.spill.path())
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.starts_with("- 20160821000000 http://example.org/page text/html 200"));
        assert!(contents.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_submit_transport_error_is_submit_failure() {
        let mut buffer = CollectionBuffer::new(make_collection(&[])).unwrap();
        buffer.append(&make_capture("http://example.org/")).unwrap();

        let client = reqwest::Client::new();
        let err = buffer.submit(&client).await.unwrap_err();
        assert!(matches!(err, AppError::Submit { .. }));
    }

    #[tokio::test]
    async fn test_empty_buffer_skips_submission() {
        let mut buffer = CollectionBuffer::new(make_collection(&[])).unwrap();
        let client = reqwest::Client::new();
        // No endpoint is reachable, but nothing was buffered either.
        let stats = buffer.submit(&client).await.unwrap();
        assert_eq!(stats.records, 0);
    }
}
