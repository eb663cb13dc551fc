//! Typed errors for the leaf parsers.
//!
//! Worker-driver code and the binaries work in `anyhow::Result`; everything
//! below this layer returns `ParseError` so call sites can match on the
//! specific failure instead of formatting a message.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("truncated length prefix")]
    TruncatedLength,

    #[error("MIME header line has no ':'")]
    MissingColon,

    #[error("multipart body has no boundary")]
    MissingBoundary,

    #[error("multipart/mixed recursion exceeded depth {0}")]
    RecursionLimitExceeded(u32),

    #[error("FastCGI record has protocol version {0}, expected 1")]
    ProtocolVersionMismatch(u8),

    #[error("unexpected FastCGI record type {0}")]
    UnexpectedRecordType(u8),

    #[error("FastCGI records for two different request IDs on one connection (multiplexing unsupported)")]
    MultiplexingUnsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
