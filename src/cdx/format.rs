// src/cdx/format.rs

//! Rendering of index records into the line-oriented CDX submission format.

use crate::models::{Capture, IndexRecord};

/// Header line opening every bulk submission body.
pub const CDX_HEADER: &str = " CDX N b a m s k r M S V g";

/// Render one index record as a single CDX line (no trailing newline).
pub fn render(record: &IndexRecord) -> String {
    match record {
        IndexRecord::Capture(capture) => capture_line(capture),
        IndexRecord::Alias { alias, target } => alias_line(alias, target),
    }
}

/// Capture line:
/// `- <timestamp> <url> <type|-> <status|-> <digest|-> <redirect|-> - <length> <offset> <filename>`
fn capture_line(capture: &Capture) -> String {
    let timestamp = capture.timestamp.format("%Y%m%d%H%M%S");
    format!(
        "- {} {} {} {} {} {} - {} {} {}",
        timestamp,
        escape(&capture.url),
        escape_opt(capture.content_type.as_deref()),
        capture
            .status
            .map_or_else(|| "-".to_string(), |s| s.to_string()),
        escape_opt(capture.digest.as_deref()),
        escape_opt(capture.redirect.as_deref()),
        capture.length,
        capture.offset,
        escape(&capture.filename),
    )
}

/// Alias line: `@alias <alias-url> <target-url>`
fn alias_line(alias: &str, target: &str) -> String {
    format!("@alias {} {}", escape(alias), escape(target))
}

/// Percent-escape space/CR/LF so every value stays a single whitespace-joined
/// field.
fn escape(value: &str) -> String {
    if !value.contains([' ', '\r', '\n']) {
        return value.to_string();
    }
    value
        .replace(' ', "%20")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn escape_opt(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => escape(v),
        _ => "-".to_string(),
    }
}
