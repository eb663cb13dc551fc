//! Framed IPC codec between the worker and the parent.
//!
//! One unidirectional pipe, worker to parent. A message is a concatenation
//! of [`Record`] values; the terminator is `Record::End`. Every
//! variable-length field on the wire is a host-endian `u64` length followed
//! by exactly that many bytes — no trailing NUL.
//!
//! Unlike the fixed field order the encoder emits (see the worker driver),
//! the decoder here does not lean on that order: it reads a tagged
//! [`Record`] and lets the caller loop until `End`. This keeps the decoder
//! correct even if a future encoder reorders or omits pairs.

use crate::error::{ParseError, Result};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::io::{Read, Write};

/// Which of the three pair namespaces a pair belongs to, or the stream
/// terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum InputClass {
    Cookie = 0,
    Query = 1,
    Form = 2,
    EndSentinel = 3,
}

/// Validation outcome for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PairState {
    Unchecked = 0,
    Valid = 1,
    Invalid = 2,
}

/// Typed validated value, when `state == Valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PairType {
    Unset = 0,
    String = 1,
    Integer = 2,
    Double = 3,
}

/// The validated value, tagged by [`PairType`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidatedValue {
    None,
    /// Offset of the validated substring's start within `value`. See
    /// the note on the sign convention in [`crate::validate`].
    StringOffset(i64),
    Integer(i64),
    Double(f64),
}

/// One key/value field plus validation state and MIME annotations, as sent
/// worker to parent. Field order here is the encoder's wire contract; the
/// decoder does not depend on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPair {
    pub input_class: InputClass,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub state: PairState,
    pub ty: PairType,
    pub key_bucket_index: u32,
    pub validated: ValidatedValue,
    pub filename: Vec<u8>,
    pub content_type: Vec<u8>,
    pub content_type_index: u32,
    pub transfer_encoding: Vec<u8>,
}

impl ParsedPair {
    /// A pair with no validator applied and no MIME annotations, the common
    /// case for query/cookie/urlencoded/text fields.
    pub fn plain(input_class: InputClass, key: Vec<u8>, value: Vec<u8>, key_bucket_index: u32) -> Self {
        Self {
            input_class,
            key,
            value,
            state: PairState::Unchecked,
            ty: PairType::Unset,
            key_bucket_index,
            validated: ValidatedValue::None,
            filename: Vec::new(),
            content_type: Vec::new(),
            content_type_index: 0,
            transfer_encoding: Vec::new(),
        }
    }
}

/// A message on the wire: either a parsed pair or the stream terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Pair(ParsedPair),
    End,
}

fn write_bytes(out: &mut dyn Write, b: &[u8]) -> std::io::Result<()> {
    out.write_all(&(b.len() as u64).to_ne_bytes())?;
    out.write_all(b)
}

fn read_bytes(instream: &mut dyn Read) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 8];
    instream.read_exact(&mut len_bytes)?;
    let len = u64::from_ne_bytes(len_bytes) as usize;
    let mut b = vec![0u8; len];
    instream.read_exact(&mut b)?;
    Ok(b)
}

fn write_u32(out: &mut dyn Write, v: u32) -> std::io::Result<()> {
    out.write_all(&v.to_ne_bytes())
}

fn read_u32(instream: &mut dyn Read) -> Result<u32> {
    let mut b = [0u8; 4];
    instream.read_exact(&mut b)?;
    Ok(u32::from_ne_bytes(b))
}

fn write_i64(out: &mut dyn Write, v: i64) -> std::io::Result<()> {
    out.write_all(&v.to_ne_bytes())
}

fn read_i64(instream: &mut dyn Read) -> Result<i64> {
    let mut b = [0u8; 8];
    instream.read_exact(&mut b)?;
    Ok(i64::from_ne_bytes(b))
}

fn write_f64(out: &mut dyn Write, v: f64) -> std::io::Result<()> {
    out.write_all(&v.to_ne_bytes())
}

fn read_f64(instream: &mut dyn Read) -> Result<f64> {
    let mut b = [0u8; 8];
    instream.read_exact(&mut b)?;
    Ok(f64::from_ne_bytes(b))
}

/// Write one record. A hard write failure here is fatal to the worker; the
/// caller propagates it up through `anyhow` and exits.
pub fn write_record(out: &mut dyn Write, record: &Record) -> std::io::Result<()> {
    match record {
        Record::End => {
            write_u32(out, InputClass::EndSentinel.to_u32().unwrap())?;
        }
        Record::Pair(p) => {
            write_u32(out, p.input_class.to_u32().unwrap())?;
            write_bytes(out, &p.key)?;
            write_bytes(out, &p.value)?;
            write_u32(out, p.state.to_u32().unwrap())?;
            write_u32(out, p.ty.to_u32().unwrap())?;
            write_u32(out, p.key_bucket_index)?;
            match p.validated {
                ValidatedValue::None => write_u32(out, 0)?,
                ValidatedValue::StringOffset(off) => {
                    write_u32(out, 1)?;
                    write_i64(out, off)?;
                }
                ValidatedValue::Integer(i) => {
                    write_u32(out, 2)?;
                    write_i64(out, i)?;
                }
                ValidatedValue::Double(d) => {
                    write_u32(out, 3)?;
                    write_f64(out, d)?;
                }
            }
            write_bytes(out, &p.filename)?;
            write_bytes(out, &p.content_type)?;
            write_u32(out, p.content_type_index)?;
            write_bytes(out, &p.transfer_encoding)?;
        }
    }
    out.flush()
}

/// Read one record. `Ok(None)` means clean EOF before any bytes of the next
/// record's class tag were read (the peer closed the pipe, or already sent
/// `End`); anything else truncated mid-record is a protocol error.
pub fn read_record(instream: &mut dyn Read) -> Result<Option<Record>> {
    let mut class_bytes = [0u8; 4];
    match instream.read_exact(&mut class_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let class_tag = u32::from_ne_bytes(class_bytes);
    let input_class = InputClass::from_u32(class_tag)
        .ok_or(ParseError::TruncatedLength)?;
    if input_class == InputClass::EndSentinel {
        return Ok(Some(Record::End));
    }
    let key = read_bytes(instream)?;
    let value = read_bytes(instream)?;
    let state = PairState::from_u32(read_u32(instream)?).ok_or(ParseError::TruncatedLength)?;
    let ty = PairType::from_u32(read_u32(instream)?).ok_or(ParseError::TruncatedLength)?;
    let key_bucket_index = read_u32(instream)?;
    let validated = match read_u32(instream)? {
        0 => ValidatedValue::None,
        1 => ValidatedValue::StringOffset(read_i64(instream)?),
        2 => ValidatedValue::Integer(read_i64(instream)?),
        3 => ValidatedValue::Double(read_f64(instream)?),
        _ => return Err(ParseError::TruncatedLength),
    };
    let filename = read_bytes(instream)?;
    let content_type = read_bytes(instream)?;
    let content_type_index = read_u32(instream)?;
    let transfer_encoding = read_bytes(instream)?;
    Ok(Some(Record::Pair(ParsedPair {
        input_class,
        key,
        value,
        state,
        ty,
        key_bucket_index,
        validated,
        filename,
        content_type,
        content_type_index,
        transfer_encoding,
    })))
}
