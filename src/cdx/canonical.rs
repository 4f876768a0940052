// src/cdx/canonical.rs

//! URL canonicalization and sort-key transforms.
//!
//! Three related forms are produced from a raw URL:
//!
//! - the canonical URL stored in the index,
//! - SURT, the host-reversed form used for lexicographic sort-by-site,
//! - SSURT, a scheme-insensitive SURT variant used only for access-control
//!   prefix matching (never stored in the index).
//!
//! All transforms are pure string functions with no I/O.

use std::sync::OnceLock;

use regex::Regex;

/// Canonicalize a raw URL string.
///
/// Strips surrounding whitespace, lowercases the scheme and host, normalizes
/// percent-encoding (uppercase hex, unreserved characters decoded), and
/// escapes raw space/CR/LF so the URL always stays on one text line.
pub fn canonicalize(url: &str) -> String {
    let url = url.trim();
    let (scheme, rest) = split_scheme(url);
    let (authority, path) = split_authority(rest);
    let mut out = String::with_capacity(url.len() + 8);
    out.push_str(&scheme.to_ascii_lowercase());
    out.push_str("://");
    out.push_str(&authority.to_ascii_lowercase());
    out.push_str(&normalize_escapes(path));
    out
}

/// Sort-friendly URL Reordering Transform.
///
/// `scheme://host/path` becomes `scheme://(tld,domain,...,)/path`. A URL
/// whose authority already starts with `(` is treated as pre-reordered and
/// passed through, which makes the transform idempotent.
pub fn to_surt(url: &str) -> String {
    let canonical = canonicalize(url);
    reorder_host(&canonical)
}

/// Scheme-insensitive SURT used for access-control prefix matching.
///
/// Like [`to_surt`] but with `https` coerced to `http`, the fragment
/// dropped, and a leading `www` / `www<digits>` host label stripped.
pub fn to_ssurt(url: &str) -> String {
    ssurt_inner(url, true)
}

/// Convert an admin-entered URL pattern into an SSURT prefix.
///
/// - `*.example.org` becomes the reversed-domain string with no path, open
///   at the end so every subdomain and path falls under it;
/// - `example.org/path*` becomes the canonical SSURT of the stem;
/// - an exact pattern becomes its canonical SSURT plus one trailing space
///   sentinel, so `example.org` never prefix-matches `example.org.au`.
pub fn to_prefix(pattern: &str) -> String {
    let pattern = pattern.trim();
    // An already-reordered prefix (authority starting with `(`) is stored
    // verbatim apart from scheme coercion.
    let (scheme, rest) = split_scheme(pattern);
    if rest.starts_with('(') {
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "https" => "http".to_string(),
            other => other.to_string(),
        };
        return format!("{scheme}://{rest}");
    }
    if let Some(domain) = pattern.strip_prefix("*.") {
        let domain = domain.split('/').next().unwrap_or(domain);
        let mut out = String::from("http://(");
        for label in domain.to_ascii_lowercase().split('.').rev() {
            out.push_str(label);
            out.push(',');
        }
        return out;
    }
    if let Some(stem) = pattern.strip_suffix('*') {
        return ssurt_inner(stem, false);
    }
    let mut out = ssurt_inner(pattern, true);
    out.push(' ');
    out
}

fn ssurt_inner(url: &str, add_root_path: bool) -> String {
    let trimmed = url.trim();
    // Drop the fragment before any other handling.
    let without_fragment = match trimmed.find('#') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };
    let (scheme, rest) = split_scheme(without_fragment);
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "https" => "http".to_string(),
        other => other.to_string(),
    };
    let (authority, path) = split_authority(rest);
    if authority.starts_with('(') {
        // Pre-reordered input: nothing left to strip or reverse.
        return format!("{scheme}://{authority}{path}");
    }
    let lowered = authority.to_ascii_lowercase();
    let authority = strip_www(&lowered);

    let mut reassembled = String::with_capacity(without_fragment.len());
    reassembled.push_str(&scheme);
    reassembled.push_str("://");
    reassembled.push_str(authority);
    if path.is_empty() {
        if add_root_path {
            reassembled.push('/');
        }
    } else {
        reassembled.push_str(&normalize_escapes(path));
    }
    reorder_host(&reassembled)
}

/// Split `scheme://rest`, defaulting to `http` when no scheme is present.
fn split_scheme(url: &str) -> (&str, &str) {
    match url.find("://") {
        Some(idx) => (&url[..idx], &url[idx + 3..]),
        None => ("http", url),
    }
}

/// Split the authority from the path/query portion.
fn split_authority(rest: &str) -> (&str, &str) {
    match rest.find(['/', '?']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    }
}

/// Strip one leading `www` or `www<digits>` label.
fn strip_www(host: &str) -> &str {
    static WWW: OnceLock<Regex> = OnceLock::new();
    let re = WWW.get_or_init(|| Regex::new(r"^www\d*\.").unwrap());
    match re.find(host) {
        Some(m) if m.end() < host.len() => &host[m.end()..],
        _ => host,
    }
}

/// Rewrite `scheme://host...` into `scheme://(reversed,host,)...`.
///
/// Already-reordered input (authority starting with `(`) passes through.
fn reorder_host(canonical: &str) -> String {
    let (scheme, rest) = split_scheme(canonical);
    if rest.starts_with('(') {
        return canonical.to_string();
    }
    let (authority, path) = split_authority(rest);
    // Strip userinfo, keep the port for the sorted form.
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let (host, port) = match host_port.rfind(':') {
        Some(idx) if host_port[idx + 1..].chars().all(|c| c.is_ascii_digit()) => {
            (&host_port[..idx], Some(&host_port[idx..]))
        }
        _ => (host_port, None),
    };

    let mut out = String::with_capacity(canonical.len() + 4);
    out.push_str(scheme);
    out.push_str("://(");
    for label in host.split('.').rev() {
        out.push_str(label);
        out.push(',');
    }
    if let Some(port) = port {
        out.push_str(port);
    }
    out.push(')');
    out.push_str(path);
    out
}

/// Normalize percent-encoding and escape raw space/CR/LF.
///
/// Unreserved characters are decoded, everything else is re-emitted with
/// uppercase hex. Invalid escape sequences are left untouched.
fn normalize_escapes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'%' if i + 2 < bytes.len() => match decode_hex_pair(bytes[i + 1], bytes[i + 2]) {
                Some(v) if is_unreserved(v) => {
                    out.push(v);
                    i += 3;
                }
                Some(v) => {
                    out.extend_from_slice(format!("%{v:02X}").as_bytes());
                    i += 3;
                }
                None => {
                    out.push(b);
                    i += 1;
                }
            },
            b' ' => {
                out.extend_from_slice(b"%20");
                i += 1;
            }
            b'\r' => {
                out.extend_from_slice(b"%0D");
                i += 1;
            }
            b'\n' => {
                out.extend_from_slice(b"%0A");
                i += 1;
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }
    // Only ASCII sequences were rewritten, so this never actually loses bytes.
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}
