// src/archive/mod.rs

//! Archive container reading.
//!
//! [`ArchiveReader`] iterates a WARC or legacy ARC container as a finite,
//! forward-only sequence of [`ArchiveRecord`]s. Gzipped containers store one
//! record per gzip member; each record carries the raw-file byte offset of
//! its member so compressed lengths can be computed by diffing consecutive
//! offsets (the container's total length closes the last record).
//!
//! Mid-stream corruption fails the current record without invalidating the
//! ones already read; trailing garbage after the last record is tolerated.
//! An unrecognizable container header fails with
//! [`AppError::CorruptContainer`].

mod arc;
mod record;
mod warc;

pub use record::{ArchiveRecord, RecordKind};

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::bufread::GzDecoder;

use crate::error::{AppError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Container format, detected from the first record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerFormat {
    Warc,
    Arc,
}

/// Read adapter that counts consumed bytes of the underlying stream.
struct CountingReader<R> {
    inner: R,
    pos: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

enum Source {
    /// Per-record gzip members over the raw file
    Gzip(BufReader<CountingReader<File>>),
    /// Uncompressed container
    Plain(CountingReader<BufReader<File>>),
}

/// Forward-only reader over one archive container.
pub struct ArchiveReader {
    source: Source,
    format: Option<ContainerFormat>,
    path: String,
    total_len: u64,
    done: bool,
}

impl ArchiveReader {
    /// Open a container, sniffing gzip by magic bytes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let mut file =
            File::open(path.as_ref()).map_err(|e| AppError::corrupt(&path_str, e))?;
        let total_len = file.metadata()?.len();

        let mut magic = [0u8; 2];
        let gz = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(0))?;

        let source = if gz {
            Source::Gzip(BufReader::new(CountingReader::new(file)))
        } else {
            Source::Plain(CountingReader::new(BufReader::new(file)))
        };

        Ok(Self {
            source,
            format: None,
            path: path_str,
            total_len,
            done: false,
        })
    }

    /// Total declared container length in bytes.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Yield the next indexable record.
    ///
    /// Container self-description records (`warcinfo`, ARC `filedesc://`)
    /// are consumed silently. The first error on an undetected format is a
    /// [`AppError::CorruptContainer`]; later errors end iteration after the
    /// records already yielded.
    pub fn next_record(&mut self) -> Option<Result<ArchiveRecord>> {
        while !self.done {
            match self.read_next() {
                Ok(Some(record)) => {
                    if record.kind == RecordKind::Filedesc {
                        continue;
                    }
                    return Some(Ok(record));
                }
                Ok(None) => {
                    self.done = true;
                    if self.format.is_none() {
                        return Some(Err(AppError::corrupt(&self.path, "no records found")));
                    }
                }
                Err(e) => {
                    self.done = true;
                    if self.format.is_none() {
                        return Some(Err(AppError::corrupt(&self.path, e)));
                    }
                    return Some(Err(e));
                }
            }
        }
        None
    }

    fn read_next(&mut self) -> Result<Option<ArchiveRecord>> {
        match &mut self.source {
            Source::Gzip(reader) => {
                let offset = reader.get_ref().pos - reader.buffer().len() as u64;
                let at_member = {
                    let head = reader.fill_buf()?;
                    if head.is_empty() {
                        return Ok(None);
                    }
                    head.len() >= 2 && head[..2] == GZIP_MAGIC
                };
                if !at_member {
                    // Trailing garbage after the last member.
                    return Ok(None);
                }
                let mut decoder = GzDecoder::new(&mut *reader);
                let record = read_one(&mut decoder, &mut self.format)?;
                // Drain to the member boundary so the next offset is exact.
                io::copy(&mut decoder, &mut io::sink())?;
                Ok(record.map(|mut r| {
                    r.offset = offset;
                    r
                }))
            }
            Source::Plain(reader) => loop {
                let offset = reader.pos;
                match read_line(reader)? {
                    None => return Ok(None),
                    Some(line) if line.is_empty() => continue,
                    Some(line) => {
                        let mut record = read_from_line(reader, &line, &mut self.format)?;
                        record.offset = offset;
                        return Ok(Some(record));
                    }
                }
            },
        }
    }
}

impl Iterator for ArchiveReader {
    type Item = Result<ArchiveRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

/// Skip blank separator lines, then parse one record.
fn read_one<R: Read>(
    reader: &mut R,
    format: &mut Option<ContainerFormat>,
) -> Result<Option<ArchiveRecord>> {
    loop {
        match read_line(reader)? {
            None => return Ok(None),
            Some(line) if line.is_empty() => continue,
            Some(line) => return read_from_line(reader, &line, format).map(Some),
        }
    }
}

/// Dispatch on the record's first header line, pinning the format.
fn read_from_line<R: Read>(
    reader: &mut R,
    line: &[u8],
    format: &mut Option<ContainerFormat>,
) -> Result<ArchiveRecord> {
    let text = String::from_utf8_lossy(line).into_owned();
    if text.starts_with("WARC/") {
        if *format == Some(ContainerFormat::Arc) {
            return Err(AppError::validation("WARC record inside an ARC container"));
        }
        *format = Some(ContainerFormat::Warc);
        return warc::read_record(reader);
    }
    if *format == Some(ContainerFormat::Arc) || text.starts_with("filedesc://") {
        *format = Some(ContainerFormat::Arc);
        return arc::read_record(reader, &text);
    }
    let head: String = text.chars().take(40).collect();
    Err(AppError::validation(format!(
        "unrecognized record header: {head}"
    )))
}

/// Read one `\n`-terminated line, stripping the terminator and a trailing
/// `\r`. Returns `None` only at EOF before any byte.
pub(crate) fn read_line<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte)? {
            0 => {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            _ => {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn warc_record_bytes(url: &str, body: &str) -> Vec<u8> {
        format!(
            "WARC/1.0\r\n\
             WARC-Type: response\r\n\
             WARC-Target-URI: {}\r\n\
             WARC-Date: 2016-08-21T12:00:00Z\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}\r\n\r\n",
            url,
            body.len(),
            body
        )
        .into_bytes()
    }

    fn gzip_member(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn write_temp(bytes: &[u8]) -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn test_plain_warc_two_records() {
        let mut bytes = warc_record_bytes("http://example.org/a", "HTTP/1.1 200 OK\r\n\r\naaa");
        let second_offset = bytes.len() as u64;
        bytes.extend(warc_record_bytes(
            "http://example.org/b",
            "HTTP/1.1 404 Not Found\r\n\r\n",
        ));
        let path = write_temp(&bytes);

        let mut reader = ArchiveReader::open(&path).unwrap();
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.url.as_deref(), Some("http://example.org/a"));
        assert_eq!(first.offset, 0);
        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.url.as_deref(), Some("http://example.org/b"));
        assert_eq!(second.offset, second_offset);
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_gzip_member_offsets() {
        let first = gzip_member(&warc_record_bytes(
            "http://example.org/a",
            "HTTP/1.1 200 OK\r\n\r\naaa",
        ));
        let second = gzip_member(&warc_record_bytes(
            "http://example.org/b",
            "HTTP/1.1 200 OK\r\n\r\nbbb",
        ));
        let boundary = first.len() as u64;
        let mut bytes = first;
        bytes.extend(&second);
        let path = write_temp(&bytes);

        let mut reader = ArchiveReader::open(&path).unwrap();
        let a = reader.next_record().unwrap().unwrap();
        assert_eq!(a.offset, 0);
        let b = reader.next_record().unwrap().unwrap();
        assert_eq!(b.offset, boundary);
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_trailing_garbage_tolerated() {
        let mut bytes = gzip_member(&warc_record_bytes(
            "http://example.org/a",
            "HTTP/1.1 200 OK\r\n\r\naaa",
        ));
        bytes.extend(b"not a gzip member at all");
        let path = write_temp(&bytes);

        let mut reader = ArchiveReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_ok());
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_unrecognized_container_is_corrupt() {
        let path = write_temp(b"this is not an archive\nat all\n");
        let mut reader = ArchiveReader::open(&path).unwrap();
        let err = reader.next_record().unwrap().unwrap_err();
        assert!(matches!(err, AppError::CorruptContainer { .. }));
    }

    #[test]
    fn test_empty_container_is_corrupt() {
        let path = write_temp(b"");
        let mut reader = ArchiveReader::open(&path).unwrap();
        let err = reader.next_record().unwrap().unwrap_err();
        assert!(matches!(err, AppError::CorruptContainer { .. }));
    }

    #[test]
    fn test_arc_filedesc_skipped() {
        let desc_body = "1 0 InternetArchive";
        let capture_body = "HTTP/1.0 200 OK\r\n\r\nhello";
        let bytes = format!(
            "filedesc://IA-001.arc 0.0.0.0 19960923142103 text/plain {}\n{}\n\
             http://example.org/ 10.0.0.1 20010203040506 text/html {}\n{}\n",
            desc_body.len(),
            desc_body,
            capture_body.len(),
            capture_body
        );
        let path = write_temp(bytes.as_bytes());

        let mut reader = ArchiveReader::open(&path).unwrap();
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.kind, RecordKind::Response);
        assert_eq!(record.url.as_deref(), Some("http://example.org/"));
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_midstream_corruption_fails_current_record_only() {
        let mut bytes = warc_record_bytes("http://example.org/a", "HTTP/1.1 200 OK\r\n\r\naaa");
        bytes.extend(b"WARC/1.0\r\nContent-Length: 999999\r\n\r\nshort");
        let path = write_temp(&bytes);

        let mut reader = ArchiveReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_ok());
        assert!(reader.next_record().unwrap().is_err());
        assert!(reader.next_record().is_none());
    }
}
