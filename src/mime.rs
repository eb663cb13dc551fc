//! RFC 2045 MIME header parsing, as used inside one multipart segment.
//!
//! Grounded on `original_source/input.c::mime_parse`/`mime_reset` (the
//! permissive variant that ignores unrecognized headers, matching this
//! crate's spec, as opposed to `original_source/kcgi.c::hmime_parse` which
//! fails the whole parse on an unrecognized header or sub-parameter).

use crate::error::{ParseError, Result};
use log::warn;

/// The handful of headers and parameters this crate extracts from a
/// multipart segment's MIME preamble.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeDescriptor {
    pub disposition: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub filename: Option<Vec<u8>>,
    pub content_type: Option<Vec<u8>>,
    pub transfer_encoding: Option<Vec<u8>>,
    pub boundary: Option<Vec<u8>>,
}

impl MimeDescriptor {
    /// `content-type`, defaulting to `text/plain` per RFC 2045 when absent.
    pub fn content_type_or_default(&self) -> &[u8] {
        self.content_type.as_deref().unwrap_or(b"text/plain")
    }
}

fn find(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    if haystack.len() < 2 {
        return None;
    }
    (0..=haystack.len() - 2).find(|&i| haystack[i] == b'\r' && haystack[i + 1] == b'\n')
}

fn trim_leading_ws(mut b: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = b.split_first() {
        if first == b' ' || first == b'\t' {
            b = rest;
        } else {
            break;
        }
    }
    b
}

fn trim_trailing_ws(mut b: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = b.split_last() {
        if last == b' ' || last == b'\t' {
            b = rest;
        } else {
            break;
        }
    }
    b
}

fn eq_ignore_ascii_case(a: &[u8], b: &str) -> bool {
    a.eq_ignore_ascii_case(b.as_bytes())
}

/// One `; key=value` or `; key="value"` segment of a header's parameter
/// list.
struct Param<'a> {
    key: &'a [u8],
    value: Vec<u8>,
}

/// Split `rest` (everything after the header's own value, starting at the
/// first `;`) into parameters. Quoted values may contain any byte but `"`.
fn parse_params(mut rest: &[u8]) -> Vec<Param<'_>> {
    let mut params = Vec::new();
    loop {
        rest = trim_leading_ws(rest);
        if rest.first() == Some(&b';') {
            rest = &rest[1..];
        }
        rest = trim_leading_ws(rest);
        if rest.is_empty() {
            break;
        }
        let Some(eq) = find(rest, b'=') else { break };
        let key = trim_trailing_ws(&rest[..eq]);
        let after_eq = &rest[eq + 1..];
        if after_eq.first() == Some(&b'"') {
            let inner = &after_eq[1..];
            let Some(end_quote) = find(inner, b'"') else { break };
            params.push(Param { key, value: inner[..end_quote].to_vec() });
            rest = &inner[end_quote + 1..];
        } else {
            let end = find(after_eq, b';').unwrap_or(after_eq.len());
            params.push(Param { key, value: trim_trailing_ws(&after_eq[..end]).to_vec() });
            rest = &after_eq[end..];
        }
    }
    params
}

/// Parse one MIME header block starting at `input[*pos]`, advancing `*pos`
/// past the terminating empty line. The content-type-index is resolved
/// separately, by [`resolve_content_type_index`], against the descriptor's
/// raw (pre-default) `content_type`.
pub fn parse_mime_headers(input: &[u8], pos: &mut usize) -> Result<MimeDescriptor> {
    let mut descriptor = MimeDescriptor::default();
    loop {
        let line_start = *pos;
        let Some(rel_end) = find_crlf(&input[line_start..]) else {
            return Err(ParseError::MissingColon);
        };
        let line = &input[line_start..line_start + rel_end];
        *pos = line_start + rel_end + 2;
        if line.is_empty() {
            return Ok(descriptor);
        }
        let Some(colon) = find(line, b':') else {
            return Err(ParseError::MissingColon);
        };
        let name = trim_trailing_ws(&line[..colon]);
        let value_and_params = trim_leading_ws(&line[colon + 1..]);
        let value_end = find(value_and_params, b';').unwrap_or(value_and_params.len());
        let value = trim_trailing_ws(&value_and_params[..value_end]).to_vec();
        let params_rest = &value_and_params[value_end..];

        if eq_ignore_ascii_case(name, "content-transfer-encoding") {
            descriptor.transfer_encoding = Some(value);
        } else if eq_ignore_ascii_case(name, "content-disposition") {
            descriptor.disposition = Some(value);
            for p in parse_params(params_rest) {
                if eq_ignore_ascii_case(p.key, "name") {
                    descriptor.name = Some(p.value);
                } else if eq_ignore_ascii_case(p.key, "filename") {
                    descriptor.filename = Some(p.value);
                }
            }
        } else if eq_ignore_ascii_case(name, "content-type") {
            descriptor.content_type = Some(value);
            for p in parse_params(params_rest) {
                if eq_ignore_ascii_case(p.key, "boundary") {
                    descriptor.boundary = Some(p.value);
                }
            }
        } else {
            warn!("ignoring unrecognized MIME header");
        }
    }
}

/// Resolve `content_type_index` by case-insensitive prefix match of the
/// type/subtype (characters up to `;`) against `whitelist`. Returns
/// `whitelist.len()` when absent or not found.
pub fn resolve_content_type_index(content_type: Option<&[u8]>, whitelist: &[&str]) -> usize {
    let Some(ct) = content_type else { return whitelist.len() };
    let end = find(ct, b';').unwrap_or(ct.len());
    let type_subtype = &ct[..end];
    whitelist
        .iter()
        .position(|candidate| type_subtype.eq_ignore_ascii_case(candidate.as_bytes()))
        .unwrap_or(whitelist.len())
}
