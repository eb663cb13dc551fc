//! Body demultiplexer: inspects `CONTENT_TYPE` and routes to the right
//! body parser (§4.4).
//!
//! Grounded on `original_source/child.c::kworker_child_body`'s Content-Type
//! dispatch table and debug hex-dump-to-stderr logic.

use crate::mime::MimeDescriptor;
use crate::multipart::{self, MultipartPart};
use crate::pairs::{self, TextPair};
use crate::urlencode::{self, UrlPair};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One field produced by the body demultiplexer, already shaped close to
/// the wire `ParsedPair` FORM fields (key/value/filename/content-type/
/// transfer-encoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyField {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub filename: Vec<u8>,
    pub content_type: Vec<u8>,
    /// The field's content type as it actually appeared (on the wire or in
    /// MIME headers), `None` if there was none to begin with. `content_type`
    /// above may carry a default in its place; MIME-whitelist index
    /// resolution must use this field instead, per
    /// `original_source/child.c:190-191,578`.
    pub content_type_raw: Option<Vec<u8>>,
    pub transfer_encoding: Vec<u8>,
}

impl From<UrlPair> for BodyField {
    fn from(p: UrlPair) -> Self {
        Self {
            key: p.key,
            value: p.value,
            filename: Vec::new(),
            content_type: Vec::new(),
            content_type_raw: None,
            transfer_encoding: Vec::new(),
        }
    }
}

impl From<TextPair> for BodyField {
    fn from(p: TextPair) -> Self {
        Self {
            key: p.key,
            value: p.value,
            filename: Vec::new(),
            content_type: Vec::new(),
            content_type_raw: None,
            transfer_encoding: Vec::new(),
        }
    }
}

impl From<MultipartPart> for BodyField {
    fn from(p: MultipartPart) -> Self {
        Self {
            key: p.key,
            value: p.value,
            filename: p.filename,
            content_type: p.content_type,
            content_type_raw: p.content_type_raw,
            transfer_encoding: p.transfer_encoding,
        }
    }
}

/// Hex-escape `body` by glyph class for the debug body-logging knob (§6):
/// printable bytes and `\n` pass through, `\r \t \v \b` get their C escape,
/// everything else becomes `?`.
pub fn debug_format_body(body: &[u8]) -> String {
    let mut out = String::with_capacity(body.len());
    for &b in body {
        match b {
            b'\n' => out.push('\n'),
            0x20..=0x7e => out.push(b as char),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x0b => out.push_str("\\v"),
            0x08 => out.push_str("\\b"),
            _ => out.push('?'),
        }
    }
    out
}

/// Dispatch on `content_type` per the §4.4 decision table. `boundary`
/// carries a pre-parsed `Content-Type` header (used only for its
/// `boundary` parameter in the multipart case). Parts are streamed to
/// `emit` as they're produced; a multipart parse failure aborts just this
/// body (logged) — whatever was already emitted stays emitted.
pub fn demux_body(
    content_type: Option<&[u8]>,
    content_type_header: Option<&MimeDescriptor>,
    method: Method,
    body: &[u8],
    emit: &mut dyn FnMut(BodyField),
) {
    let Some(ct) = content_type else {
        emit(BodyField {
            key: Vec::new(),
            value: body.to_vec(),
            filename: Vec::new(),
            content_type: b"application/octet-stream".to_vec(),
            content_type_raw: None,
            transfer_encoding: Vec::new(),
        });
        return;
    };

    let type_subtype_end = ct.iter().position(|&b| b == b';').unwrap_or(ct.len());
    let type_subtype = &ct[..type_subtype_end];

    if type_subtype.eq_ignore_ascii_case(b"application/x-www-form-urlencoded") {
        for pair in urlencode::parse_urlencoded_pairs(body) {
            emit(pair.into());
        }
    } else if type_subtype.eq_ignore_ascii_case(b"multipart/form-data") {
        let boundary = content_type_header.and_then(|d| d.boundary.clone());
        match boundary {
            Some(boundary) => {
                let mut local_emit = |part: MultipartPart| emit(part.into());
                if let Err(e) = multipart::parse_multipart_body(body, &boundary, &mut local_emit) {
                    warn!("multipart body abandoned: {e}");
                }
            }
            None => warn!("multipart/form-data with no boundary parameter, body skipped"),
        }
    } else if type_subtype.eq_ignore_ascii_case(b"text/plain") && method == Method::Post {
        for pair in pairs::parse_text_pairs(body) {
            emit(pair.into());
        }
    } else {
        emit(BodyField {
            key: Vec::new(),
            value: body.to_vec(),
            filename: Vec::new(),
            content_type: ct.to_vec(),
            content_type_raw: Some(ct.to_vec()),
            transfer_encoding: Vec::new(),
        });
    }
}
