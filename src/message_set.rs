//! Forward cursor over a fetched response frame.
//!
//! A [`MessageSetReader`] is constructed by the broker session after the
//! full size-prefixed response frame has been read off the connection. It
//! never seeks: `read_header`, `read_set`, and `next_msg` each advance the
//! cursor, and a truncated trailing message simply stops the stream with
//! `(0, [])` so the caller can account the bytes it did consume.

use bytes::Bytes;
use nombytes::NomBytes;

use crate::codec::CodecMap;
use crate::constants::RESPONSE_ERROR_CODE_SIZE;
use crate::error::{Error, Result, ServerCode};
use crate::message::{self, Message};
use crate::parser;

pub struct MessageSetReader {
    frame: Bytes,
    pos: usize,
    /// Value of the response's 4-byte length prefix (error code included).
    size: u32,
    /// Number of per-partition sets a multi-fetch response carries.
    sets: usize,
}

impl MessageSetReader {
    pub(crate) fn new(frame: Bytes, size: u32, sets: usize) -> Self {
        Self {
            frame,
            pos: 0,
            size,
            sets,
        }
    }

    /// The response length as claimed by its prefix. A value of 2 means the
    /// response is header-only and carries no messages.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of per-partition sets this reader expects (multi-fetch only).
    pub fn len(&self) -> usize {
        self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets == 0
    }

    /// Bytes left under the cursor.
    pub fn remaining(&self) -> usize {
        self.frame.len() - self.pos
    }

    /// Consume the response preamble and return its error code.
    pub fn read_header(&mut self) -> Result<ServerCode> {
        let input = NomBytes::new(self.frame.slice(self.pos..));
        let (_, code) = parser::parse_error_code(input)
            .map_err(|_| Error::Protocol("response shorter than a header".to_string()))?;
        self.pos += RESPONSE_ERROR_CODE_SIZE;
        Ok(ServerCode::from_code(code))
    }

    /// Consume a per-partition set header (multi-fetch only) and return the
    /// set length and its error code. The length covers the 2-byte error
    /// code just consumed plus the message bytes that follow.
    pub fn read_set(&mut self) -> Result<(u32, ServerCode)> {
        let input = NomBytes::new(self.frame.slice(self.pos..));
        let (_, (length, code)) = parser::parse_set_header(input)
            .map_err(|_| Error::Protocol("response truncated inside a set header".to_string()))?;
        self.pos += 4 + RESPONSE_ERROR_CODE_SIZE;
        Ok((length, ServerCode::from_code(code)))
    }

    /// Attempt to decode one message frame at the cursor.
    ///
    /// Returns `(0, [])` when the remaining bytes are too few for a complete
    /// frame; otherwise the consumed byte count (length prefix included) and
    /// the decoded messages, with compressed frames already flattened.
    pub fn next_msg(&mut self, codecs: &CodecMap) -> Result<(usize, Vec<Message>)> {
        match message::decode(&self.frame[self.pos..], codecs)? {
            Some((consumed, messages)) => {
                self.pos += consumed;
                Ok((consumed, messages))
            }
            None => Ok((0, Vec::new())),
        }
    }

    /// Advance the cursor without decoding, clamped to the frame end.
    pub(crate) fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.frame.len());
    }

    /// Consume the header (if not already done) and return the raw response
    /// body. Used for offsets responses, whose body is not a message set.
    pub fn payload(&mut self) -> Result<Bytes> {
        if self.pos == 0 {
            let code = self.read_header()?;
            if code != ServerCode::None {
                return Err(Error::Server(code));
            }
        }
        Ok(self.frame.slice(self.pos..))
    }
}
