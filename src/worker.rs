//! Worker driver (§5): ties environment ingestion, request-metadata
//! extraction, body demultiplexing, validation and IPC emission together
//! in the fixed order the parent relies on, for both CGI and FastCGI
//! entry points.
//!
//! Grounded on the teacher's `minifcgi.rs::run`/`run_one` loop shape and
//! `Handler` trait (generalized here to a fixed emission pipeline instead
//! of an application callback, since this crate's "handler" is always the
//! same untrusted-input parser) and on
//! `original_source/child.c::kworker_child_auth/scheme/remote/port/
//! httphost/scriptname/path/method`, which ground the request-metadata
//! extraction with its RFC-violation defaults.

use crate::body::{demux_body, BodyField, Method};
use crate::config::WorkerConfig;
use crate::digest::compute_ha2;
use crate::env::{http_headers, ingest_cgi_env, EnvEntry};
use crate::env_provider::EnvProvider;
use crate::fastcgi::read_session;
use crate::ipc::{InputClass, ParsedPair, Record};
use crate::mime::{parse_mime_headers, resolve_content_type_index};
use crate::urlencode::parse_urlencoded_pairs;
use crate::validate::{dispatch, FieldValidator};
use anyhow::{anyhow, Result};
use log::warn;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Basic,
    Digest,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

fn env_lookup<'a>(env: &'a [EnvEntry], key: &str) -> Option<&'a [u8]> {
    env.iter().find(|e| e.key == key.as_bytes()).map(|e| e.value.as_slice())
}

fn env_lookup_str<'a>(env: &'a [EnvEntry], key: &str) -> Option<&'a str> {
    env_lookup(env, key).and_then(|v| std::str::from_utf8(v).ok())
}

/// RFC 3875 §4.1.12, defaulting to GET for anything but an exact `POST`
/// match (this crate's reduced method table carries no "unknown" verb per
/// `original_source/kcgi.h`).
pub fn method(env: &[EnvEntry]) -> Method {
    match env_lookup_str(env, "REQUEST_METHOD") {
        Some(m) if m.eq_ignore_ascii_case("POST") => Method::Post,
        _ => Method::Get,
    }
}

/// RFC 3875 §4.1.1, defaulting to `AuthKind::None`.
pub fn auth_kind(env: &[EnvEntry]) -> AuthKind {
    match env_lookup_str(env, "AUTH_TYPE") {
        None => AuthKind::None,
        Some(v) if v.eq_ignore_ascii_case("basic") => AuthKind::Basic,
        Some(v) if v.eq_ignore_ascii_case("digest") => AuthKind::Digest,
        Some(_) => AuthKind::Unknown,
    }
}

/// `HTTPS` is not in any RFC; it's the de facto way servers signal TLS.
pub fn scheme(env: &[EnvEntry]) -> Scheme {
    match env_lookup_str(env, "HTTPS") {
        Some(v) if v.eq_ignore_ascii_case("on") => Scheme::Https,
        _ => Scheme::Http,
    }
}

/// RFC 3875 §4.1.8, defaulting to `127.0.0.1` on an RFC violation.
pub fn remote_address(env: &[EnvEntry]) -> Vec<u8> {
    match env_lookup(env, "REMOTE_ADDR") {
        Some(v) => v.to_vec(),
        None => {
            warn!("RFC violation: REMOTE_ADDR not set");
            b"127.0.0.1".to_vec()
        }
    }
}

/// RFC 3875 §4.1.15, defaulting to 80 on absence or parse failure.
pub fn port(env: &[EnvEntry]) -> u16 {
    match env_lookup_str(env, "SERVER_PORT") {
        Some(v) => v.parse().unwrap_or_else(|_| {
            warn!("RFC violation: invalid SERVER_PORT");
            80
        }),
        None => {
            warn!("RFC violation: SERVER_PORT not set");
            80
        }
    }
}

/// RFC 7230 §5.4, defaulting to `localhost`.
pub fn host(env: &[EnvEntry]) -> Vec<u8> {
    match env_lookup(env, "HTTP_HOST") {
        Some(v) => v.to_vec(),
        None => {
            warn!("RFC violation: HTTP_HOST not set");
            b"localhost".to_vec()
        }
    }
}

/// RFC 3875 §4.1.13, defaulting to empty.
pub fn script_name(env: &[EnvEntry]) -> Vec<u8> {
    env_lookup(env, "SCRIPT_NAME").map(|v| v.to_vec()).unwrap_or_default()
}

/// Path components derived from `PATH_INFO`: `(path_info, suffix, base,
/// sub)`. Mirrors `kworker_child_path`: a leading `/` is stripped before
/// splitting, the suffix is the bytes after the last `.` once no `/`
/// intervenes, and the remainder splits on the first `/` into base and
/// sub. All four fields are empty when `PATH_INFO` is absent or empty.
pub fn path_components(env: &[EnvEntry]) -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
    let path_info = env_lookup(env, "PATH_INFO").unwrap_or(&[]).to_vec();
    let mut rest: &[u8] = &path_info;
    if rest.first() == Some(&b'/') {
        rest = &rest[1..];
    }
    if rest.is_empty() {
        return (path_info, Vec::new(), Vec::new(), Vec::new());
    }

    let mut cut = rest.len() - 1;
    while cut > 0 && rest[cut] != b'/' && rest[cut] != b'.' {
        cut -= 1;
    }
    let (body, suffix) = if rest[cut] == b'.' {
        (&rest[..cut], rest[cut + 1..].to_vec())
    } else {
        (rest, Vec::new())
    };

    let (base, sub) = match body.iter().position(|&b| b == b'/') {
        Some(i) => (body[..i].to_vec(), body[i + 1..].to_vec()),
        None => (body.to_vec(), Vec::new()),
    };

    (path_info, suffix, base, sub)
}

/// Drive the fixed-order emission described in §5: environment headers,
/// request metadata, body pairs (with digest MD5 if applicable), query
/// pairs, cookie pairs, then `Record::End`.
pub fn emit_request(
    env: &[EnvEntry],
    body: &[u8],
    config: &WorkerConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let validator_table = config.validator_table();
    let mime_whitelist: Vec<&str> = config.mime_whitelist.iter().map(String::as_str).collect();

    write_headers(env, out)?;
    write_request_line(env, out)?;
    write_body(env, body, config, &validator_table, &mime_whitelist, out)?;
    write_query(env, &validator_table, out)?;
    write_cookies(env, &validator_table, out)?;

    crate::ipc::write_record(out, &Record::End)?;
    Ok(())
}

fn write_u32_field(out: &mut dyn Write, v: u32) -> Result<()> {
    out.write_all(&v.to_ne_bytes())?;
    Ok(())
}

fn write_bytes_field(out: &mut dyn Write, b: &[u8]) -> Result<()> {
    out.write_all(&(b.len() as u64).to_ne_bytes())?;
    out.write_all(b)?;
    Ok(())
}

fn write_headers(env: &[EnvEntry], out: &mut dyn Write) -> Result<()> {
    let headers = http_headers(env);
    write_u32_field(out, headers.len() as u32)?;
    for h in &headers {
        write_u32_field(out, h.recognized_index)?;
        write_bytes_field(out, &h.name)?;
        write_bytes_field(out, &h.value)?;
    }
    Ok(())
}

fn write_request_line(env: &[EnvEntry], out: &mut dyn Write) -> Result<()> {
    write_u32_field(out, method(env) as u32)?;
    write_u32_field(out, auth_kind(env) as u32)?;
    let raw_auth = env_lookup(env, "HTTP_AUTHORIZATION");
    write_u32_field(out, raw_auth.is_some() as u32)?;
    write_u32_field(out, scheme(env) as u32)?;
    write_bytes_field(out, &remote_address(env))?;
    let (path_info, suffix, base, sub) = path_components(env);
    write_bytes_field(out, &path_info)?;
    write_bytes_field(out, &suffix)?;
    write_bytes_field(out, &base)?;
    write_bytes_field(out, &sub)?;
    write_bytes_field(out, &script_name(env))?;
    write_bytes_field(out, &host(env))?;
    out.write_all(&port(env).to_ne_bytes())?;
    Ok(())
}

fn validated_pair(
    input_class: InputClass,
    key: Vec<u8>,
    value: Vec<u8>,
    table: &[FieldValidator],
) -> ParsedPair {
    let mut pair = ParsedPair::plain(input_class, key.clone(), value.clone(), 0);
    if let Some(validated) = dispatch(table, &key, &value) {
        pair.state = crate::ipc::PairState::Valid;
        pair.ty = match validated {
            crate::ipc::ValidatedValue::StringOffset(_) => crate::ipc::PairType::String,
            crate::ipc::ValidatedValue::Integer(_) => crate::ipc::PairType::Integer,
            crate::ipc::ValidatedValue::Double(_) => crate::ipc::PairType::Double,
            crate::ipc::ValidatedValue::None => crate::ipc::PairType::Unset,
        };
        pair.validated = validated;
    } else if table.iter().any(|entry| entry.key == key) {
        pair.state = crate::ipc::PairState::Invalid;
    }
    pair
}

fn body_field_pair(field: BodyField, table: &[FieldValidator]) -> ParsedPair {
    let mut pair = validated_pair(InputClass::Form, field.key, field.value, table);
    pair.filename = field.filename;
    pair.content_type = field.content_type;
    pair.transfer_encoding = field.transfer_encoding;
    pair
}

fn write_body(
    env: &[EnvEntry],
    body: &[u8],
    config: &WorkerConfig,
    table: &[FieldValidator],
    mime_whitelist: &[&str],
    out: &mut dyn Write,
) -> Result<()> {
    let content_type = env_lookup(env, "CONTENT_TYPE");
    // CONTENT_TYPE's env value is already exactly an HTTP header value
    // (RFC 3875 §4.1.3), so reconstituting a one-line header out of it and
    // running it through the MIME header parser is a faithful way to reuse
    // that parser's `boundary=` parameter extraction here.
    let content_type_header = content_type.and_then(|ct| {
        let line = format!("Content-Type: {}\r\n\r\n", String::from_utf8_lossy(ct));
        let mut pos = 0;
        parse_mime_headers(line.as_bytes(), &mut pos).ok()
    });

    if config.debug_log_bodies {
        eprintln!("[pid {}] body: {}", std::process::id(), crate::body::debug_format_body(body));
    }

    let mut fields = Vec::new();
    demux_body(
        content_type,
        content_type_header.as_ref(),
        method(env),
        body,
        &mut |f| fields.push(f),
    );

    for field in fields {
        let content_type_index =
            resolve_content_type_index(field.content_type_raw.as_deref(), mime_whitelist) as u32;
        let mut pair = body_field_pair(field, table);
        pair.content_type_index = content_type_index;
        crate::ipc::write_record(out, &Record::Pair(pair))?;
    }

    if auth_kind(env) == AuthKind::Digest {
        let script = String::from_utf8_lossy(&script_name(env)).into_owned();
        let (path_info, _, _, _) = path_components(env);
        let path_info_str = String::from_utf8_lossy(&path_info).into_owned();
        let method_str = if method(env) == Method::Post { "POST" } else { "GET" };
        let ha2 = compute_ha2(method_str, &script, &path_info_str, body);
        log::debug!("computed digest-auth HA2 {}", hex::encode(ha2));
        write_bytes_field(out, &ha2)?;
    } else {
        write_bytes_field(out, &[])?;
    }
    Ok(())
}

fn write_query(env: &[EnvEntry], table: &[FieldValidator], out: &mut dyn Write) -> Result<()> {
    let query = env_lookup(env, "QUERY_STRING").unwrap_or(&[]);
    for pair in parse_urlencoded_pairs(query) {
        let parsed = validated_pair(InputClass::Query, pair.key, pair.value, table);
        crate::ipc::write_record(out, &Record::Pair(parsed))?;
    }
    Ok(())
}

/// One `key=value` token out of a `Cookie` header.
struct CookiePair {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Tokenize a raw `Cookie` header value per `original_source/child.c`'s
/// privilege-separated `parse_pairs`: split on `;` only (never `&`), skip
/// leading spaces before each key, and treat the value as opaque — no
/// percent-decoding, since RFC 6265 cookie values are not URL-encoded and
/// this crate does not check them for disallowed characters. A token with
/// no `=` or a zero-length key is skipped and logged, matching the
/// source's `XWARNX` calls.
fn parse_cookie_pairs(input: &[u8]) -> Vec<CookiePair> {
    let mut pairs = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        while rest.first() == Some(&b' ') {
            rest = &rest[1..];
        }
        let token_end = rest.iter().position(|&b| b == b';').unwrap_or(rest.len());
        let token = &rest[..token_end];
        let remainder = if token_end < rest.len() { &rest[token_end + 1..] } else { &rest[token_end..] };

        match token.iter().position(|&b| b == b'=') {
            None => warn!("cookie key: no value"),
            Some(eq) => {
                let key = &token[..eq];
                let value = &token[eq + 1..];
                if key.is_empty() {
                    warn!("cookie key: zero length");
                } else {
                    pairs.push(CookiePair { key: key.to_vec(), value: value.to_vec() });
                }
            }
        }
        rest = remainder;
    }
    pairs
}

fn write_cookies(env: &[EnvEntry], table: &[FieldValidator], out: &mut dyn Write) -> Result<()> {
    let cookie_header = env_lookup(env, "HTTP_COOKIE").unwrap_or(&[]);
    for pair in parse_cookie_pairs(cookie_header) {
        let parsed = validated_pair(InputClass::Cookie, pair.key, pair.value, table);
        crate::ipc::write_record(out, &Record::Pair(parsed))?;
    }
    Ok(())
}

/// Run one CGI-mode request: ingest the environment via `provider`, read
/// exactly `CONTENT_LENGTH` bytes of body from `stdin` (clamped, absent or
/// invalid treated as zero), then emit the parsed stream to `out`.
pub fn run_cgi(
    provider: &dyn EnvProvider,
    stdin: &mut dyn Read,
    out: &mut dyn Write,
    config: &WorkerConfig,
) -> Result<()> {
    let env = ingest_cgi_env(provider);
    let content_length: usize = env_lookup_str(&env, "CONTENT_LENGTH")
        .and_then(|v| v.parse::<i64>().ok())
        .map(|v| v.max(0) as usize)
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    let mut read_total = 0;
    while read_total < content_length {
        let n = stdin.read(&mut body[read_total..])?;
        if n == 0 {
            warn!("short CGI body read: wanted {content_length}, got {read_total}");
            body.truncate(read_total);
            break;
        }
        read_total += n;
    }

    emit_request(&env, &body, config, out)
}

/// Run the FastCGI session loop on `control` until EOF, emitting each
/// session's parsed stream to `out`.
pub fn run_fastcgi(
    control: &mut dyn Read,
    control_out: &mut dyn Write,
    out: &mut dyn Write,
    config: &WorkerConfig,
) -> Result<()> {
    loop {
        let session = read_session(control, control_out)
            .map_err(|e| anyhow!("FastCGI session error: {e}"))?;
        let Some(session) = session else { break };
        emit_request(&session.env, &session.body, config, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_provider::MapEnv;
    use std::io::Cursor;

    fn entries(pairs: &[(&str, &str)]) -> Vec<EnvEntry> {
        pairs
            .iter()
            .map(|(k, v)| EnvEntry { key: k.as_bytes().to_vec(), value: v.as_bytes().to_vec() })
            .collect()
    }

    #[test]
    fn method_defaults_to_get() {
        assert_eq!(method(&entries(&[])), Method::Get);
        assert_eq!(method(&entries(&[("REQUEST_METHOD", "POST")])), Method::Post);
        assert_eq!(method(&entries(&[("REQUEST_METHOD", "DELETE")])), Method::Get);
    }

    #[test]
    fn auth_kind_recognizes_known_values() {
        assert_eq!(auth_kind(&entries(&[])), AuthKind::None);
        assert_eq!(auth_kind(&entries(&[("AUTH_TYPE", "Digest")])), AuthKind::Digest);
        assert_eq!(auth_kind(&entries(&[("AUTH_TYPE", "ntlm")])), AuthKind::Unknown);
    }

    #[test]
    fn scheme_defaults_to_http() {
        assert_eq!(scheme(&entries(&[])), Scheme::Http);
        assert_eq!(scheme(&entries(&[("HTTPS", "on")])), Scheme::Https);
        assert_eq!(scheme(&entries(&[("HTTPS", "off")])), Scheme::Http);
    }

    #[test]
    fn remote_address_defaults_on_rfc_violation() {
        assert_eq!(remote_address(&entries(&[])), b"127.0.0.1".to_vec());
        assert_eq!(remote_address(&entries(&[("REMOTE_ADDR", "10.0.0.1")])), b"10.0.0.1".to_vec());
    }

    #[test]
    fn port_defaults_to_80_on_absence_or_bad_parse() {
        assert_eq!(port(&entries(&[])), 80);
        assert_eq!(port(&entries(&[("SERVER_PORT", "not-a-port")])), 80);
        assert_eq!(port(&entries(&[("SERVER_PORT", "8080")])), 8080);
    }

    #[test]
    fn path_components_split_suffix_base_sub() {
        let env = entries(&[("PATH_INFO", "/app/page.html")]);
        let (path_info, suffix, base, sub) = path_components(&env);
        assert_eq!(path_info, b"/app/page.html".to_vec());
        assert_eq!(suffix, b"html".to_vec());
        assert_eq!(base, b"app".to_vec());
        assert_eq!(sub, b"page".to_vec());
    }

    #[test]
    fn path_components_empty_when_path_info_absent() {
        let (path_info, suffix, base, sub) = path_components(&entries(&[]));
        assert!(path_info.is_empty());
        assert!(suffix.is_empty());
        assert!(base.is_empty());
        assert!(sub.is_empty());
    }

    #[test]
    fn cookie_pairs_are_opaque_and_split_on_semicolon_only() {
        let parsed = parse_cookie_pairs(b"a=1+2; b=x%20y&z");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].key, b"a".to_vec());
        assert_eq!(parsed[0].value, b"1+2".to_vec());
        assert_eq!(parsed[1].key, b"b".to_vec());
        assert_eq!(parsed[1].value, b"x%20y&z".to_vec());
    }

    #[test]
    fn cookie_pairs_skip_leading_spaces_between_tokens() {
        let parsed = parse_cookie_pairs(b"a=1;   b=2");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].key, b"b".to_vec());
        assert_eq!(parsed[1].value, b"2".to_vec());
    }

    #[test]
    fn cookie_pairs_skip_token_with_no_equals() {
        let parsed = parse_cookie_pairs(b"novalue; a=1");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, b"a".to_vec());
        assert_eq!(parsed[0].value, b"1".to_vec());
    }

    #[test]
    fn cookie_pairs_skip_zero_length_key() {
        let parsed = parse_cookie_pairs(b"=empty; a=1");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, b"a".to_vec());
    }

    #[test]
    fn absent_content_type_resolves_to_whitelist_length_even_if_whitelist_contains_the_default() {
        // A multipart part with no Content-Type header defaults to
        // text/plain on the wire, but its content-type-index must still
        // reflect that the header was genuinely absent, not that
        // "text/plain" matched the whitelist.
        let mut config = WorkerConfig::default();
        config.mime_whitelist = vec!["text/plain".to_string()];
        let provider = MapEnv::new(vec![
            ("REQUEST_METHOD".to_string(), "POST".to_string()),
            (
                "CONTENT_TYPE".to_string(),
                "multipart/form-data; boundary=XYZ".to_string(),
            ),
        ]);
        let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nhi\r\n--XYZ--".to_vec();
        let mut entries = provider.vars();
        entries.push(("CONTENT_LENGTH".to_string(), body.len().to_string()));
        let provider = MapEnv::new(entries);
        let mut stdin = Cursor::new(body);
        let mut out = Vec::new();
        run_cgi(&provider, &mut stdin, &mut out, &config).unwrap();

        let mut cursor = Cursor::new(out);
        let mut records = Vec::new();
        while let Some(record) = crate::ipc::read_record(&mut cursor).unwrap() {
            records.push(record);
        }
        let form: Vec<_> = records
            .iter()
            .filter_map(|r| match r {
                Record::Pair(p) if p.input_class == InputClass::Form => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(form.len(), 1);
        assert_eq!(form[0].content_type, b"text/plain".to_vec());
        assert_eq!(form[0].content_type_index, 1, "absent content type must index past the whitelist, not match its defaulted text/plain");
    }

    #[test]
    fn absent_opaque_body_content_type_resolves_to_whitelist_length() {
        let mut config = WorkerConfig::default();
        config.mime_whitelist = vec!["application/octet-stream".to_string()];
        let provider = MapEnv::new(vec![("REQUEST_METHOD".to_string(), "POST".to_string())]);
        let mut entries = provider.vars();
        entries.push(("CONTENT_LENGTH".to_string(), "4".to_string()));
        let provider = MapEnv::new(entries);
        let mut stdin = Cursor::new(b"data".to_vec());
        let mut out = Vec::new();
        run_cgi(&provider, &mut stdin, &mut out, &config).unwrap();

        let mut cursor = Cursor::new(out);
        let mut records = Vec::new();
        while let Some(record) = crate::ipc::read_record(&mut cursor).unwrap() {
            records.push(record);
        }
        let form: Vec<_> = records
            .iter()
            .filter_map(|r| match r {
                Record::Pair(p) if p.input_class == InputClass::Form => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(form.len(), 1);
        assert_eq!(form[0].content_type, b"application/octet-stream".to_vec());
        assert_eq!(form[0].content_type_index, 1);
    }

    #[test]
    fn run_cgi_emits_query_and_body_pairs_then_end() {
        let provider = MapEnv::new(vec![
            ("REQUEST_METHOD".to_string(), "POST".to_string()),
            ("QUERY_STRING".to_string(), "a=1".to_string()),
            ("CONTENT_TYPE".to_string(), "application/x-www-form-urlencoded".to_string()),
            ("CONTENT_LENGTH".to_string(), "3".to_string()),
        ]);
        let mut stdin = Cursor::new(b"b=2".to_vec());
        let mut out = Vec::new();
        let config = WorkerConfig::default();
        run_cgi(&provider, &mut stdin, &mut out, &config).unwrap();

        let mut cursor = Cursor::new(out);
        let mut records = Vec::new();
        while let Some(record) = crate::ipc::read_record(&mut cursor).unwrap() {
            records.push(record);
        }
        assert!(matches!(records.last(), Some(Record::End)));
    }
}
