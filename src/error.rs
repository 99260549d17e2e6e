//! Crate & protocol level errors.
//!
//! # Error Hierarchy
//!
//! - [`Error`]: connection, I/O, and protocol errors raised by the client
//! - [`ServerCode`]: wire error codes returned in broker response preambles
//!
//! A truncated trailing message in a fetch response is deliberately *not* an
//! error: the frame decoder reports "no more messages" so the fetch loop can
//! advance offsets by the bytes it actually consumed and re-request the rest.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors raised by the client.
///
/// Connect failures are kept apart from I/O failures on an established
/// stream because the drivers treat them differently: a connect failure is
/// always fatal, while read errors feed the channel consumer's
/// consecutive-error budget.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// Could not establish a TCP connection to the broker.
    #[error("connect error: {0:?}")]
    Connect(io::ErrorKind),

    /// Read or write failure on an established connection.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),

    /// Malformed data on the wire: a response shorter than its header, an
    /// oversized or nonsensical length prefix, an unknown magic byte.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Non-zero error code returned in a broker response preamble.
    #[error("server error: {0:?}")]
    Server(ServerCode),

    /// CRC mismatch on a decoded message. The set readers log and skip the
    /// affected message; this variant surfaces from the frame decoder.
    #[error("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },

    /// Unknown compression id during decode, or a payload codec failure.
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// True for a clean end-of-stream: the broker closed the connection at a
    /// frame boundary. The channel consumer does not count these against its
    /// error budget.
    pub fn is_clean_eof(&self) -> bool {
        matches!(self, Error::Io(io::ErrorKind::UnexpectedEof))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Connect(a), Error::Connect(b)) => a == b,
            (Error::Io(a), Error::Io(b)) => a == b,
            (Error::Protocol(a), Error::Protocol(b)) => a == b,
            (Error::Server(a), Error::Server(b)) => a == b,
            (
                Error::Checksum {
                    expected: ea,
                    actual: aa,
                },
                Error::Checksum {
                    expected: eb,
                    actual: ab,
                },
            ) => ea == eb && aa == ab,
            (Error::Codec(a), Error::Codec(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

/// Error codes reported by a 0.7-era Kafka broker in response preambles.
///
/// Code 0 means success; every other code is surfaced to the caller via
/// [`Error::Server`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum ServerCode {
    /// An unexpected server error.
    Unknown = -1,
    #[default]
    None = 0,
    /// The requested offset is outside the range of offsets maintained by
    /// the server for the given topic/partition.
    OffsetOutOfRange = 1,
    /// A message's contents do not match its checksum.
    InvalidMessage = 2,
    /// The request targets a partition that does not exist on this broker.
    WrongPartition = 3,
    /// The fetch size is smaller than the smallest available message.
    InvalidFetchSize = 4,
}

impl ServerCode {
    /// Interpret a raw wire code, collapsing unassigned values to
    /// [`ServerCode::Unknown`].
    pub fn from_code(code: i16) -> Self {
        ServerCode::from_i16(code).unwrap_or(ServerCode::Unknown)
    }
}
