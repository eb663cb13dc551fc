//! Environment ingester (§4.2): CGI-mode `KEY=VALUE` validation and
//! FastCGI PARAMS length-prefixed decoding, plus `HTTP_*` header
//! retitling.
//!
//! Grounded on `original_source/child.c::kworker_child_env` (the exact
//! retitling algorithm) and the CGI-mode validation rule from the same
//! file's top-level env filtering, cross-checked against the teacher's
//! `minifcgi.rs::build_params`/`fetch_field_length` for the FastCGI
//! length-prefix bit math.

use crate::env_provider::EnvProvider;
use crate::error::{ParseError, Result};
use log::warn;

/// One ingested environment entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

fn is_ascii_graphic(b: u8) -> bool {
    b.is_ascii_graphic()
}

/// Ingest the process environment (or an injected [`EnvProvider`]) for CGI
/// mode. A `KEY=VALUE` entry is rejected (and dropped, not just warned, to
/// match the source's filtering pass) if `=` is absent or at position 0, or
/// if any byte of `KEY` is not ASCII graphic. Later duplicate keys replace
/// earlier ones.
pub fn ingest_cgi_env(provider: &dyn EnvProvider) -> Vec<EnvEntry> {
    let mut entries: Vec<EnvEntry> = Vec::new();
    for (key, value) in provider.vars() {
        let key_bytes = key.as_bytes();
        if key_bytes.is_empty() || !key_bytes.iter().all(|&b| is_ascii_graphic(b)) {
            warn!("CGI env entry with non-graphic key, skipping: {key:?}");
            continue;
        }
        let entry = EnvEntry { key: key_bytes.to_vec(), value: value.into_bytes() };
        if let Some(existing) = entries.iter_mut().find(|e| e.key == entry.key) {
            existing.value = entry.value;
        } else {
            entries.push(entry);
        }
    }
    entries
}

/// Read one length prefix: a single byte with the high bit clear, or four
/// bytes (high bit of the first set) giving the low 31 bits of a
/// big-endian quadruple.
fn read_length(buf: &[u8], pos: &mut usize) -> Result<usize> {
    let b0 = *buf.get(*pos).ok_or(ParseError::TruncatedLength)?;
    if b0 & 0x80 == 0 {
        *pos += 1;
        return Ok(b0 as usize);
    }
    let b1 = *buf.get(*pos + 1).ok_or(ParseError::TruncatedLength)?;
    let b2 = *buf.get(*pos + 2).ok_or(ParseError::TruncatedLength)?;
    let b3 = *buf.get(*pos + 3).ok_or(ParseError::TruncatedLength)?;
    *pos += 4;
    Ok((((b0 & 0x7f) as usize) << 24) | ((b1 as usize) << 16) | ((b2 as usize) << 8) | b3 as usize)
}

/// Decode a FastCGI PARAMS payload into entries (§4.2). A key with a
/// non-graphic byte is skipped (both fields are still consumed so the
/// stream stays aligned); a truncated length or value is a fatal parse
/// error for the session. Later duplicate keys replace earlier ones.
pub fn ingest_fastcgi_params(buf: &[u8]) -> Result<Vec<EnvEntry>> {
    let mut entries: Vec<EnvEntry> = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let key_len = read_length(buf, &mut pos)?;
        let val_len = read_length(buf, &mut pos)?;
        if pos + key_len + val_len > buf.len() {
            return Err(ParseError::TruncatedLength);
        }
        let key = &buf[pos..pos + key_len];
        let value = &buf[pos + key_len..pos + key_len + val_len];
        pos += key_len + val_len;

        if !key.iter().all(|&b| is_ascii_graphic(b)) {
            warn!("FastCGI PARAMS key with non-graphic byte, skipping pair");
            continue;
        }
        let entry = EnvEntry { key: key.to_vec(), value: value.to_vec() };
        if let Some(existing) = entries.iter_mut().find(|e| e.key == entry.key) {
            existing.value = entry.value;
        } else {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Headers this crate recognizes by name (§4.2), in the fixed order
/// `header_index` is relative to. Grounded on `original_source/
/// child.c`'s `krequs[]` table; an entry not in this list is still
/// emitted, just with index `RECOGNIZED_HEADERS.len()` ("unknown").
pub const RECOGNIZED_HEADERS: &[&str] = &[
    "HTTP_ACCEPT",
    "HTTP_ACCEPT_CHARSET",
    "HTTP_ACCEPT_ENCODING",
    "HTTP_ACCEPT_LANGUAGE",
    "HTTP_AUTHORIZATION",
    "HTTP_DEPTH",
    "HTTP_FROM",
    "HTTP_HOST",
    "HTTP_IF",
    "HTTP_IF_MODIFIED_SINCE",
    "HTTP_IF_MATCH",
    "HTTP_IF_NONE_MATCH",
    "HTTP_IF_RANGE",
    "HTTP_IF_UNMODIFIED_SINCE",
    "HTTP_MAX_FORWARDS",
    "HTTP_PROXY_AUTHORIZATION",
    "HTTP_RANGE",
    "HTTP_REFERER",
    "HTTP_USER_AGENT",
];

/// One re-titled `HTTP_*` header, as emitted to the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    /// Index into [`RECOGNIZED_HEADERS`], or its length if this is not
    /// one of the headers the parent has a dedicated slot for.
    pub recognized_index: u32,
}

/// Re-title every `HTTP_X_FOO_BAR` entry to `X-Foo-Bar`: drop the `HTTP_`
/// prefix, uppercase the first letter after each `_`, lowercase the rest,
/// underscores become dashes. Entries named exactly `HTTP_` (nothing
/// after) are not headers and are skipped.
pub fn http_headers(entries: &[EnvEntry]) -> Vec<HttpHeader> {
    let mut headers = Vec::new();
    for entry in entries {
        if !entry.key.starts_with(b"HTTP_") || entry.key.len() == 5 {
            continue;
        }
        let suffix = &entry.key[5..];
        let mut name = Vec::with_capacity(suffix.len());
        let mut first = true;
        for &b in suffix {
            if b == b'_' {
                name.push(b'-');
                first = true;
            } else if first {
                name.push(b.to_ascii_uppercase());
                first = false;
            } else {
                name.push(b.to_ascii_lowercase());
            }
        }
        let recognized_index = RECOGNIZED_HEADERS
            .iter()
            .position(|&candidate| entry.key == candidate.as_bytes())
            .unwrap_or(RECOGNIZED_HEADERS.len()) as u32;
        headers.push(HttpHeader { name, value: entry.value.clone(), recognized_index });
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_provider::MapEnv;

    #[test]
    fn cgi_env_skips_non_graphic_keys() {
        let provider = MapEnv::new(vec![
            ("GOOD".to_string(), "1".to_string()),
            ("\u{7f}BAD".to_string(), "2".to_string()),
        ]);
        let entries = ingest_cgi_env(&provider);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, b"GOOD".to_vec());
    }

    #[test]
    fn cgi_env_last_duplicate_wins() {
        let provider = MapEnv::new(vec![
            ("K".to_string(), "first".to_string()),
            ("K".to_string(), "second".to_string()),
        ]);
        let entries = ingest_cgi_env(&provider);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, b"second".to_vec());
    }

    #[test]
    fn fastcgi_params_decodes_single_byte_lengths() {
        let mut buf = vec![3, 5];
        buf.extend_from_slice(b"KEYVALUE");
        let entries = ingest_fastcgi_params(&buf).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, b"KEY".to_vec());
        assert_eq!(entries[0].value, b"VALUE".to_vec());
    }

    #[test]
    fn fastcgi_params_decodes_four_byte_lengths() {
        let key = vec![b'K'; 200];
        let value = vec![b'V'; 200];
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x80, 0x00, 0x00, 200]);
        buf.extend_from_slice(&[0x80, 0x00, 0x00, 200]);
        buf.extend_from_slice(&key);
        buf.extend_from_slice(&value);
        let entries = ingest_fastcgi_params(&buf).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key);
        assert_eq!(entries[0].value, value);
    }

    #[test]
    fn fastcgi_params_truncated_is_fatal() {
        let buf = vec![10, 5, b'K', b'E', b'Y'];
        assert!(ingest_fastcgi_params(&buf).is_err());
    }

    #[test]
    fn retitles_http_headers_and_flags_unrecognized() {
        let entries = vec![
            EnvEntry { key: b"HTTP_X_FOO_BAR".to_vec(), value: b"baz".to_vec() },
            EnvEntry { key: b"HTTP_HOST".to_vec(), value: b"example.com".to_vec() },
        ];
        let headers = http_headers(&entries);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].name, b"X-Foo-Bar".to_vec());
        assert_eq!(headers[0].value, b"baz".to_vec());
        assert_eq!(headers[0].recognized_index, RECOGNIZED_HEADERS.len() as u32);
        assert_eq!(headers[1].name, b"Host".to_vec());
        assert_eq!(headers[1].recognized_index, 7);
    }
}
