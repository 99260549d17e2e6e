//! The message codec.
//!
//! # Frame Layout
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! Offset  Size  Field
//! 0       4     length of the remaining bytes
//! 4       1     magic (0 or 1)
//! 5       1     compression id     (magic 1 only)
//! 5|6     4     CRC32 of payload
//! 9|10    ...   payload
//! ```
//!
//! Magic 0 frames omit the compression byte; this client decodes them but
//! only ever produces magic 1. For a compressed message (compression id
//! non-zero) the payload is the codec-encoded form of a complete message
//! set, and the checksum covers those encoded bytes as they appear on the
//! wire. Decoding flattens such a message into its inner sequence,
//! recursing up to [`MAX_COMPRESSION_DEPTH`] levels.
//!
//! A frame whose length prefix points past the end of the buffer is not an
//! error: [`decode`] reports it as "no more messages" so the fetch loop can
//! advance offsets by the bytes it actually consumed.

use bytes::{BufMut, Bytes};
use tracing::warn;

use crate::codec::{self, CodecMap, GzipCodec, PayloadCodec};
use crate::constants::{
    CURRENT_MAGIC, MAX_COMPRESSION_DEPTH, MSG_HEADER_SIZE_MAGIC0, MSG_HEADER_SIZE_MAGIC1,
    MSG_LENGTH_PREFIX_SIZE, NO_COMPRESSION_ID,
};
use crate::error::{Error, Result};

/// A single record on the wire.
///
/// `offset` and `total_len` exist only at runtime: the consumer driver
/// assigns `offset` while draining a fetched message set, and `total_len`
/// records how many bytes the frame occupied on the wire including its
/// 4-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    magic: u8,
    compression: u8,
    checksum: u32,
    payload: Bytes,
    offset: u64,
    total_len: u64,
}

impl Message {
    /// Build an uncompressed magic-1 message over `payload`.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let checksum = crc32fast::hash(&payload);
        let total_len = (MSG_LENGTH_PREFIX_SIZE + MSG_HEADER_SIZE_MAGIC1 + payload.len()) as u64;
        Self {
            magic: CURRENT_MAGIC,
            compression: NO_COMPRESSION_ID,
            checksum,
            payload,
            offset: 0,
            total_len,
        }
    }

    /// Wrap already-encoded message frames in a compressed outer message.
    ///
    /// `encoded_set` must be a complete encoded message set (one or more
    /// fully framed messages); the codec's output becomes the payload and
    /// the checksum covers those encoded bytes.
    pub fn with_codec(encoded_set: &[u8], codec: &dyn PayloadCodec) -> Result<Self> {
        let encoded = codec.encode(encoded_set)?;
        let checksum = crc32fast::hash(&encoded);
        let total_len = (MSG_LENGTH_PREFIX_SIZE + MSG_HEADER_SIZE_MAGIC1 + encoded.len()) as u64;
        Ok(Self {
            magic: CURRENT_MAGIC,
            compression: codec.id(),
            checksum,
            payload: Bytes::from(encoded),
            offset: 0,
            total_len,
        })
    }

    /// Build a gzip-compressed message holding a single inner message over
    /// `payload`.
    pub fn compressed(payload: impl Into<Bytes>) -> Result<Self> {
        let inner = Message::new(payload);
        Self::with_codec(&inner.encode(), &GzipCodec)
    }

    /// Build a gzip-compressed message wrapping a sequence of inner
    /// messages, preserving their order.
    pub fn compressed_set(messages: &[Message]) -> Result<Self> {
        let mut set = Vec::new();
        for message in messages {
            message.write_to(&mut set);
        }
        Self::with_codec(&set, &GzipCodec)
    }

    pub fn magic(&self) -> u8 {
        self.magic
    }

    pub fn compression(&self) -> u8 {
        self.compression
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Byte offset within the partition log at which this message's frame
    /// begins. Assigned by the consumer during decode; zero for messages
    /// built locally.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Total bytes the frame occupies on the wire, including the 4-byte
    /// length prefix.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    fn header_size(&self) -> usize {
        if self.magic == 0 {
            MSG_HEADER_SIZE_MAGIC0
        } else {
            MSG_HEADER_SIZE_MAGIC1
        }
    }

    fn write_to<B: BufMut>(&self, buffer: &mut B) {
        buffer.put_u32((self.header_size() + self.payload.len()) as u32);
        buffer.put_u8(self.magic);
        if self.magic >= 1 {
            buffer.put_u8(self.compression);
        }
        buffer.put_u32(self.checksum);
        buffer.put_slice(&self.payload);
    }

    /// Render the full wire frame, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.total_len as usize);
        self.write_to(&mut buffer);
        buffer
    }
}

fn verify_checksum(expected: u32, payload: &[u8]) -> Result<()> {
    let actual = crc32fast::hash(payload);
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Checksum { expected, actual })
    }
}

/// Decode one message frame from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds fewer bytes than a complete frame
/// (including the empty buffer). Otherwise returns the count of bytes
/// consumed (length prefix included) and the decoded messages: one for an
/// uncompressed frame, the flattened inner sequence for a compressed one,
/// or none when the frame's checksum did not match and it was dropped.
pub fn decode(buf: &[u8], codecs: &CodecMap) -> Result<Option<(usize, Vec<Message>)>> {
    decode_at(buf, codecs, 0)
}

/// [`decode`] with the built-in codec registry.
pub fn decode_with_default_codecs(buf: &[u8]) -> Result<Option<(usize, Vec<Message>)>> {
    decode(buf, &codec::default_codecs())
}

fn decode_at(buf: &[u8], codecs: &CodecMap, depth: usize) -> Result<Option<(usize, Vec<Message>)>> {
    if buf.len() < MSG_LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length < MSG_HEADER_SIZE_MAGIC0 {
        return Err(Error::Protocol(format!(
            "message length prefix {length} shorter than any header"
        )));
    }
    if buf.len() < MSG_LENGTH_PREFIX_SIZE + length {
        // partial trailing frame, to be re-requested at the next fetch
        return Ok(None);
    }

    let frame = &buf[MSG_LENGTH_PREFIX_SIZE..MSG_LENGTH_PREFIX_SIZE + length];
    let consumed = MSG_LENGTH_PREFIX_SIZE + length;
    let magic = frame[0];
    let (compression, header_size) = match magic {
        0 => (NO_COMPRESSION_ID, MSG_HEADER_SIZE_MAGIC0),
        1 => {
            if length < MSG_HEADER_SIZE_MAGIC1 {
                return Err(Error::Protocol(format!(
                    "magic 1 frame of {length} bytes cannot hold its header"
                )));
            }
            (frame[1], MSG_HEADER_SIZE_MAGIC1)
        }
        other => {
            return Err(Error::Protocol(format!("unknown magic byte {other}")));
        }
    };
    let crc_start = header_size - 4;
    let checksum = u32::from_be_bytes([
        frame[crc_start],
        frame[crc_start + 1],
        frame[crc_start + 2],
        frame[crc_start + 3],
    ]);
    let payload = &frame[header_size..];

    if let Err(e) = verify_checksum(checksum, payload) {
        warn!(error = %e, magic, compression, "dropping message with bad checksum");
        return Ok(Some((consumed, Vec::new())));
    }

    if compression == NO_COMPRESSION_ID {
        let message = Message {
            magic,
            compression,
            checksum,
            payload: Bytes::copy_from_slice(payload),
            offset: 0,
            total_len: consumed as u64,
        };
        return Ok(Some((consumed, vec![message])));
    }

    if depth >= MAX_COMPRESSION_DEPTH {
        return Err(Error::Protocol(format!(
            "compressed message nesting exceeds depth cap {MAX_COMPRESSION_DEPTH}"
        )));
    }
    let inner_set = codec::lookup(codecs, compression)?.decode(payload)?;
    let mut messages = Vec::new();
    let mut pos = 0;
    while pos < inner_set.len() {
        match decode_at(&inner_set[pos..], codecs, depth + 1)? {
            Some((n, inner)) => {
                pos += n;
                messages.extend(inner);
            }
            None => break,
        }
    }
    Ok(Some((consumed, messages)))
}
