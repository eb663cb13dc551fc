//! FastCGI/1.0 record engine (§4.3): header framing and the per-session
//! read loop (cookie, BEGIN_REQUEST, PARAMS stream, STDIN stream,
//! acknowledgement).
//!
//! Grounded primarily on the teacher's `minifcgi.rs` (`FcgiHeader`/
//! `FcgiRecord::new_from_stream`, the corrected 4-byte PARAMS length
//! decode reused from `env.rs`), generalized against
//! `original_source/child.c::kworker_fcgi_header/content/begin/stdin/params`
//! and `kworker_fcgi_child` for the cookie-prefixed session handshake the
//! teacher's single-process demo does not need.

use crate::env::{ingest_fastcgi_params, EnvEntry};
use crate::error::{ParseError, Result};
use log::warn;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::io::Read;

pub const FCGI_VERSION_1: u8 = 1;

/// Take over the process's FD 0 as the FastCGI control socket.
///
/// Grounded on the teacher's `fcgisocketsetup.rs::init_fcgi`: a FastCGI
/// server process wrapper (`mod_fcgid` and similar) replaces the worker's
/// stdin with a listening Unix socket before exec; a plain CGI invocation
/// leaves stdin connected to a pipe or terminal, which `getpeername`
/// distinguishes by returning `ENOTCONN`. Accepts the first connection and
/// hands back a duplex stream usable as both `control` and `control_out`
/// for [`read_session`].
#[cfg(unix)]
pub fn accept_fastcgi_socket() -> std::io::Result<std::os::unix::net::UnixStream> {
    use nix::sys::socket::getpeername;
    use nix::unistd::dup2_stdin;
    use std::fs::File;
    use std::os::fd::{AsFd, AsRawFd};
    use std::os::unix::net::UnixListener;

    if getpeername::<nix::sys::socket::UnixAddr>(std::io::stdin().as_raw_fd()).is_ok() {
        return Err(std::io::Error::other(
            "FD 0 is connected, not a listening socket: not invoked as a FastCGI worker",
        ));
    }
    let socket_fd = std::io::stdin().as_fd().try_clone_to_owned()?;
    let devnull = File::open("/dev/null")?;
    dup2_stdin(devnull).map_err(std::io::Error::from)?;
    let listener = UnixListener::from(socket_fd);
    let (stream, _addr) = listener.accept()?;
    Ok(stream)
}

/// Bind and accept on an explicit Unix socket path instead of inheriting
/// FD 0, for deployments where `WorkerConfig::fastcgi_socket_path` names a
/// socket the parent creates ahead of time rather than handing the worker
/// an already-listening FD. Grounded on `jmjoy-fastcgi-client-rs::stream`'s
/// `Stream` abstraction over `UnixStream`/`TcpStream` (here just the
/// `UnixStream` half, since this crate's worker always runs local to its
/// parent).
#[cfg(unix)]
pub fn accept_fastcgi_socket_at(path: &str) -> std::io::Result<std::os::unix::net::UnixStream> {
    use std::os::unix::net::UnixListener;
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    let (stream, _addr) = listener.accept()?;
    Ok(stream)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

/// The 8-byte FastCGI record header (§3), big-endian.
#[derive(Debug, Clone, Copy)]
pub struct FcgiHeader {
    pub version: u8,
    pub rec_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl FcgiHeader {
    pub fn read_from(stream: &mut dyn Read) -> Result<Option<Self>> {
        let mut buf = [0u8; 8];
        let mut total = 0;
        while total < buf.len() {
            let n = stream.read(&mut buf[total..])?;
            if n == 0 {
                if total == 0 {
                    return Ok(None);
                }
                return Err(ParseError::Io(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            total += n;
        }
        Ok(Some(FcgiHeader {
            version: buf[0],
            rec_type: buf[1],
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        }))
    }

    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_u8(self.rec_type)
    }
}

fn read_exact_vec(stream: &mut dyn Read, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a header's content plus discard its padding.
fn read_content(stream: &mut dyn Read, header: &FcgiHeader) -> Result<Vec<u8>> {
    let content = read_exact_vec(stream, header.content_length as usize)?;
    if header.padding_length > 0 {
        let mut pad = vec![0u8; header.padding_length as usize];
        stream.read_exact(&mut pad)?;
    }
    Ok(content)
}

/// A fully-ingested FastCGI session: its environment and its accumulated
/// stdin body (§4.3). `body` never includes a trailing NUL; callers that
/// want the source's C-string-friendly framing can append one themselves.
#[derive(Debug, Clone, Default)]
pub struct FcgiSession {
    pub request_id: u16,
    pub cookie: u32,
    pub env: Vec<EnvEntry>,
    pub body: Vec<u8>,
}

fn read_u32(stream: &mut dyn Read) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut total = 0;
    while total < buf.len() {
        let n = stream.read(&mut buf[total..])?;
        if n == 0 {
            if total == 0 {
                return Ok(None);
            }
            return Err(ParseError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        total += n;
    }
    Ok(Some(u32::from_ne_bytes(buf)))
}

fn write_u32(stream: &mut dyn std::io::Write, value: u32) -> Result<()> {
    stream.write_all(&value.to_ne_bytes())?;
    Ok(())
}

/// Run one FastCGI session end to end (§4.3 steps 1-5): read the cookie,
/// validate BEGIN_REQUEST, drain PARAMS into an environment, drain STDIN
/// into a body buffer, then acknowledge by echoing cookie and
/// request-id back on `control`. Returns `Ok(None)` on a clean EOF before
/// any cookie byte is read (the controller has nothing more for us);
/// anything else truncated is a protocol error.
pub fn read_session(control: &mut dyn Read, control_out: &mut dyn std::io::Write) -> Result<Option<FcgiSession>> {
    let Some(cookie) = read_u32(control)? else {
        return Ok(None);
    };

    let header = FcgiHeader::read_from(control)?
        .ok_or(ParseError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))?;
    if header.version != FCGI_VERSION_1 {
        return Err(ParseError::ProtocolVersionMismatch(header.version));
    }
    match header.record_type() {
        Some(RecordType::BeginRequest) => {}
        other => {
            return Err(ParseError::UnexpectedRecordType(
                other.map(|_| header.rec_type).unwrap_or(header.rec_type),
            ))
        }
    }
    let begin_body = read_content(control, &header)?;
    if begin_body.len() < 2 {
        return Err(ParseError::TruncatedLength);
    }
    let flags = begin_body[2];
    if flags != 0 {
        return Err(ParseError::MultiplexingUnsupported);
    }
    let request_id = header.request_id;

    let mut env = Vec::new();
    let stdin_header = loop {
        let header = FcgiHeader::read_from(control)?
            .ok_or(ParseError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))?;
        if header.request_id != request_id {
            return Err(ParseError::MultiplexingUnsupported);
        }
        match header.record_type() {
            Some(RecordType::Params) => {
                if header.content_length == 0 {
                    warn!("FastCGI PARAMS stream ended without an explicit STDIN record, treating next as STDIN");
                    let next = FcgiHeader::read_from(control)?.ok_or(ParseError::Io(
                        std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                    ))?;
                    break next;
                }
                let content = read_content(control, &header)?;
                let entries = ingest_fastcgi_params(&content)?;
                for entry in entries {
                    if let Some(existing) = env.iter_mut().find(|e: &&mut EnvEntry| e.key == entry.key) {
                        *existing = entry;
                    } else {
                        env.push(entry);
                    }
                }
            }
            _ => break header,
        }
    };

    if stdin_header.record_type() != Some(RecordType::Stdin) {
        return Err(ParseError::UnexpectedRecordType(stdin_header.rec_type));
    }

    let mut body = Vec::new();
    let mut header = stdin_header;
    loop {
        if header.record_type() != Some(RecordType::Stdin) {
            return Err(ParseError::UnexpectedRecordType(header.rec_type));
        }
        if header.content_length == 0 {
            break;
        }
        let content = read_content(control, &header)?;
        body.extend_from_slice(&content);
        header = FcgiHeader::read_from(control)?
            .ok_or(ParseError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))?;
    }

    write_u32(control_out, cookie)?;
    control_out.write_all(&request_id.to_be_bytes())?;

    Ok(Some(FcgiSession { request_id, cookie, env, body }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes(rec_type: u8, request_id: u16, content: &[u8], padding: u8) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(FCGI_VERSION_1);
        out.push(rec_type);
        out.extend_from_slice(&request_id.to_be_bytes());
        out.extend_from_slice(&(content.len() as u16).to_be_bytes());
        out.push(padding);
        out.push(0);
        out.extend_from_slice(content);
        out.extend(std::iter::repeat(0u8).take(padding as usize));
        out
    }

    fn synthetic_session_bytes(request_id: u16, params: &[u8], body: &[u8]) -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend_from_slice(&42u32.to_ne_bytes());
        stream.extend(header_bytes(RecordType::BeginRequest as u8, request_id, &[0, 1, 0, 0, 0, 0, 0, 0], 0));
        stream.extend(header_bytes(RecordType::Params as u8, request_id, params, 0));
        stream.extend(header_bytes(RecordType::Params as u8, request_id, &[], 0));
        stream.extend(header_bytes(RecordType::Stdin as u8, request_id, body, 0));
        stream.extend(header_bytes(RecordType::Stdin as u8, request_id, &[], 0));
        stream
    }

    #[test]
    fn reads_a_full_session_and_acknowledges() {
        let mut params = vec![3, 5];
        params.extend_from_slice(b"KEYVALUE");
        let stream_bytes = synthetic_session_bytes(1, &params, b"body-bytes");
        let mut input = Cursor::new(stream_bytes);
        let mut output = Vec::new();
        let session = read_session(&mut input, &mut output).unwrap().unwrap();
        assert_eq!(session.request_id, 1);
        assert_eq!(session.cookie, 42);
        assert_eq!(session.env.len(), 1);
        assert_eq!(session.env[0].key, b"KEY".to_vec());
        assert_eq!(session.body, b"body-bytes".to_vec());
        assert_eq!(&output[0..4], &42u32.to_ne_bytes());
        assert_eq!(&output[4..6], &1u16.to_be_bytes());
    }

    #[test]
    fn clean_eof_before_cookie_is_none() {
        let mut input = Cursor::new(Vec::<u8>::new());
        let mut output = Vec::new();
        assert!(read_session(&mut input, &mut output).unwrap().is_none());
    }

    #[test]
    fn wrong_version_is_an_error() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&1u32.to_ne_bytes());
        stream.push(2); // bad version
        stream.extend_from_slice(&[0u8; 7]);
        let mut input = Cursor::new(stream);
        let mut output = Vec::new();
        assert!(read_session(&mut input, &mut output).is_err());
    }

    #[test]
    fn nonzero_begin_flags_are_unsupported() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&1u32.to_ne_bytes());
        stream.extend(header_bytes(RecordType::BeginRequest as u8, 1, &[0, 1, 1, 0, 0, 0, 0, 0], 0));
        let mut input = Cursor::new(stream);
        let mut output = Vec::new();
        assert!(read_session(&mut input, &mut output).is_err());
    }
}
