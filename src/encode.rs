//! Serialize data into the wire protocol.
//!
//! All integers are big-endian. Strings are prefixed with a 2-byte length;
//! raw byte payloads are written as-is, with any length prefix emitted
//! explicitly by the caller (message sets carry a 4-byte set length, message
//! frames their own 4-byte length prefix).

use bytes::{BufMut, Bytes};

use crate::error::Result;
use crate::types::RequestType;

pub trait ToByte {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()>;
}

impl<'a, T: ToByte + 'a + ?Sized> ToByte for &'a T {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        (*self).encode(buffer)
    }
}

impl ToByte for u8 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u8(*self);
        Ok(())
    }
}

impl ToByte for i16 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i16(*self);
        Ok(())
    }
}

impl ToByte for u16 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u16(*self);
        Ok(())
    }
}

impl ToByte for i32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i32(*self);
        Ok(())
    }
}

impl ToByte for u32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u32(*self);
        Ok(())
    }
}

impl ToByte for i64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i64(*self);
        Ok(())
    }
}

impl ToByte for u64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u64(*self);
        Ok(())
    }
}

impl ToByte for str {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u16(self.len() as u16);
        buffer.put(self.as_bytes());
        Ok(())
    }
}

impl ToByte for String {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.as_str().encode(buffer)
    }
}

impl ToByte for [u8] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put(self);
        Ok(())
    }
}

impl ToByte for Bytes {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        buffer.put_slice(self);
        Ok(())
    }
}

/// Render the topic header reused by every request body:
/// `[2-byte topic-name length][topic-name bytes][4-byte partition]`.
pub fn encode_topic_header<W: BufMut>(buffer: &mut W, topic: &str, partition: i32) -> Result<()> {
    topic.encode(buffer)?;
    partition.encode(buffer)
}

/// A request frame under construction.
///
/// The body is written through [`RequestFrame::body_mut`]; [`finish`]
/// prefixes it with `[4-byte length of the remainder][2-byte request type]`
/// where the length covers everything after itself.
///
/// [`finish`]: RequestFrame::finish
pub struct RequestFrame {
    request_type: RequestType,
    body: Vec<u8>,
}

impl RequestFrame {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            body: Vec::new(),
        }
    }

    /// Write cursor for the request body.
    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    /// Consume the frame and render the size-prefixed wire bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        let total = (self.body.len() + crate::constants::REQUEST_TYPE_SIZE) as u32;
        let mut result = Vec::with_capacity(4 + total as usize);
        total.encode(&mut result)?;
        self.request_type.encode(&mut result)?;
        result.extend_from_slice(&self.body);
        Ok(result)
    }
}
