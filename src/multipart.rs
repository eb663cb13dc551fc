//! RFC 2046 §5.1.1 multipart/form-data boundary scanning, with recursive
//! multipart/mixed support.
//!
//! Grounded on `original_source/input.c::parse_multiform`/`parse_multi`:
//! the boundary is `CRLF "--" boundary` except on the very first scan
//! (prologue case, no leading CRLF); a missing boundary, an unterminated
//! part, or a `multipart/mixed` part missing its own `boundary=` parameter
//! aborts the parse for this multipart level and every level above it
//! (propagated as `Err`) — the caller (the body demultiplexer) is
//! responsible for catching that and continuing with the rest of the
//! request, per the resolved Open Question in `SPEC_FULL.md` §4.8/§9.

use crate::error::{ParseError, Result};
use crate::mime::{self, MimeDescriptor};
use log::warn;

/// Recursion bound for nested `multipart/mixed`, preventing stack
/// exhaustion from adversarial nesting (REDESIGN FLAGS).
pub const MAX_MULTIPART_DEPTH: u32 = 8;

/// One terminal form part emitted by the parser (never a `multipart/mixed`
/// container itself — those are unwrapped by recursion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub filename: Vec<u8>,
    pub content_type: Vec<u8>,
    /// The part's `Content-Type` as it actually appeared in the MIME
    /// headers, `None` if the header was absent. `content_type` above is
    /// always the RFC 2045 `text/plain` default when this is `None`; index
    /// resolution against a caller's MIME whitelist must use this field,
    /// not the defaulted one (`original_source/child.c:190-191,578`).
    pub content_type_raw: Option<Vec<u8>>,
    pub transfer_encoding: Vec<u8>,
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Parse a full multipart/form-data body, emitting one [`MultipartPart`]
/// per terminal segment via `emit`, in document order. Streaming: parts
/// are emitted as they're found, so a later failure (a bad nested part)
/// does not retract parts already emitted.
pub fn parse_multipart_body(
    buf: &[u8],
    boundary: &[u8],
    emit: &mut dyn FnMut(MultipartPart),
) -> Result<()> {
    let mut pos = 0;
    parse_level(buf, &mut pos, buf.len(), boundary, None, 0, emit)
}

fn parse_level(
    buf: &[u8],
    pos: &mut usize,
    len: usize,
    boundary: &[u8],
    inherited_name: Option<&[u8]>,
    depth: u32,
    emit: &mut dyn FnMut(MultipartPart),
) -> Result<()> {
    if depth > MAX_MULTIPART_DEPTH {
        return Err(ParseError::RecursionLimitExceeded(depth));
    }

    let mut first = true;
    while *pos < len {
        let needle: Vec<u8> = if first {
            [b"--", boundary].concat()
        } else {
            [b"\r\n--", boundary].concat()
        };
        let Some(rel) = find_subslice(&buf[*pos..len], &needle) else {
            return Err(ParseError::MissingBoundary);
        };
        let boundary_start = *pos + rel;
        let mut endpos = boundary_start + needle.len();
        if endpos > len {
            return Err(ParseError::MissingBoundary);
        }

        let terminator = endpos + 2 <= len && &buf[endpos..endpos + 2] == b"--";
        if terminator {
            endpos = len;
        } else {
            while endpos < len && buf[endpos] == b' ' {
                endpos += 1;
            }
            if endpos + 2 > len || &buf[endpos..endpos + 2] != b"\r\n" {
                return Err(ParseError::MissingBoundary);
            }
            endpos += 2;
        }

        let content_before_headers = boundary_start - *pos;
        if content_before_headers == 0 {
            *pos = endpos;
            first = false;
            continue;
        }

        let mut header_pos = *pos;
        let descriptor = mime::parse_mime_headers(&buf[..boundary_start], &mut header_pos)?;

        if descriptor.disposition.is_none() {
            warn!("multiform: no MIME disposition, skipping part");
            *pos = endpos;
            first = false;
            continue;
        }
        let name: Option<Vec<u8>> = descriptor
            .name
            .clone()
            .or_else(|| inherited_name.map(|n| n.to_vec()));
        let Some(name) = name else {
            warn!("multiform: no MIME name, skipping part");
            *pos = endpos;
            first = false;
            continue;
        };

        let body_start = header_pos;
        let body_len = boundary_start - body_start;

        if descriptor.content_type_or_default().eq_ignore_ascii_case(b"multipart/mixed") {
            let Some(inner_boundary) = descriptor.boundary.clone() else {
                return Err(ParseError::MissingBoundary);
            };
            let mut inner_pos = body_start;
            parse_level(
                buf,
                &mut inner_pos,
                body_start + body_len,
                &inner_boundary,
                Some(&name),
                depth + 1,
                emit,
            )?;
        } else {
            emit(MultipartPart {
                key: name,
                value: buf[body_start..body_start + body_len].to_vec(),
                filename: descriptor.filename.clone().unwrap_or_default(),
                content_type: descriptor.content_type_or_default().to_vec(),
                content_type_raw: descriptor.content_type.clone(),
                transfer_encoding: descriptor.transfer_encoding.clone().unwrap_or_default(),
            });
        }

        *pos = endpos;
        first = false;
    }
    Ok(())
}

/// Extract the `boundary=` parameter from a `multipart/form-data`
/// `Content-Type` value (the header's own parameter syntax, not full MIME
/// header parsing — grounded on `original_source/input.c::parse_multi`).
pub fn extract_boundary(content_type: &MimeDescriptor) -> Option<Vec<u8>> {
    content_type.boundary.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_scenario_three() {
        let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nHi\r\n--XYZ--";
        let mut parts = Vec::new();
        parse_multipart_body(body, b"XYZ", &mut |p| parts.push(p)).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].key, b"f".to_vec());
        assert_eq!(parts[0].value, b"Hi".to_vec());
        assert_eq!(parts[0].content_type, b"text/plain".to_vec());
        // No Content-Type header was present: the display string defaults
        // to text/plain, but the raw field must stay None so a whitelist
        // containing "text/plain" doesn't get spuriously matched.
        assert_eq!(parts[0].content_type_raw, None);
    }

    #[test]
    fn nested_multipart_mixed_inherits_name() {
        let inner = b"--INNER\r\nContent-Disposition: attachment; filename=\"a.txt\"\r\n\r\ndata-a\r\n--INNER\r\nContent-Disposition: attachment; filename=\"b.txt\"\r\n\r\ndata-b\r\n--INNER--".to_vec();
        let mut outer = Vec::new();
        outer.extend_from_slice(b"--XYZ\r\nContent-Disposition: form-data; name=\"attachments\"\r\nContent-Type: multipart/mixed; boundary=INNER\r\n\r\n");
        outer.extend_from_slice(&inner);
        outer.extend_from_slice(b"\r\n--XYZ--");

        let mut parts = Vec::new();
        parse_multipart_body(&outer, b"XYZ", &mut |p| parts.push(p)).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].key, b"attachments".to_vec());
        assert_eq!(parts[0].filename, b"a.txt".to_vec());
        assert_eq!(parts[0].value, b"data-a".to_vec());
        assert_eq!(parts[1].key, b"attachments".to_vec());
        assert_eq!(parts[1].filename, b"b.txt".to_vec());
        assert_eq!(parts[1].value, b"data-b".to_vec());
    }

    #[test]
    fn missing_boundary_terminator_is_an_error() {
        let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nHi";
        let mut parts = Vec::new();
        let result = parse_multipart_body(body, b"XYZ", &mut |p| parts.push(p));
        assert!(result.is_err());
    }

    #[test]
    fn part_without_disposition_is_skipped_not_fatal() {
        let body = b"--XYZ\r\nContent-Type: text/plain\r\n\r\nskip-me\r\n--XYZ\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nkeep-me\r\n--XYZ--";
        let mut parts = Vec::new();
        parse_multipart_body(body, b"XYZ", &mut |p| parts.push(p)).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].key, b"f".to_vec());
        assert_eq!(parts[0].value, b"keep-me".to_vec());
    }

    #[test]
    fn recursion_past_depth_limit_is_an_error() {
        // Wrap `inner` (whose own parts use boundary `inner_boundary`) in a
        // multipart/mixed part that itself uses boundary `boundary`. Each
        // nesting level gets a distinct boundary string so the scanner
        // never confuses an inner level's markers for its own.
        fn wrap(inner: &[u8], inner_boundary: &str, boundary: &str, name: Option<&str>) -> Vec<u8> {
            let mut buf = Vec::new();
            buf.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            if let Some(n) = name {
                buf.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{n}\"\r\n").as_bytes(),
                );
            } else {
                buf.extend_from_slice(b"Content-Disposition: attachment\r\n");
            }
            buf.extend_from_slice(
                format!("Content-Type: multipart/mixed; boundary={inner_boundary}\r\n\r\n")
                    .as_bytes(),
            );
            buf.extend_from_slice(inner);
            buf.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
            buf
        }
        // Ten levels of multipart/mixed nesting (one more than the depth
        // bound), each with its own boundary string.
        let mut body = b"--L10\r\nContent-Disposition: attachment; filename=\"x\"\r\n\r\ndata\r\n--L10--".to_vec();
        for level in (1..=9).rev() {
            body = wrap(&body, &format!("L{}", level + 1), &format!("L{level}"), None);
        }
        let top = wrap(&body, "L1", "TOP", Some("attachments"));
        let mut parts = Vec::new();
        let result = parse_multipart_body(&top, b"TOP", &mut |p| parts.push(p));
        assert!(result.is_err());
    }
}
