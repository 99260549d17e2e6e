//! Broker session: one TCP connection plus its topic bindings.
//!
//! A [`BrokerSession`] owns the connection to a single broker address and
//! an ordered list of `(topic, partition)` bindings. It exposes the request
//! encoders and the framed read/write primitives the producer and consumer
//! drivers are built on. The connection is opened lazily on the first send
//! and closed explicitly; the session is not thread-safe, so concurrent use
//! requires external serialization.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::constants::{MAX_RESPONSE_SIZE, RESPONSE_ERROR_CODE_SIZE};
use crate::encode::{encode_topic_header, RequestFrame, ToByte};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::message_set::MessageSetReader;
use crate::types::{ProduceRequest, RequestType, TopicPartition};

pub struct BrokerSession {
    addr: String,
    topics: Vec<TopicPartition>,
    conn: Option<TcpStream>,
}

impl BrokerSession {
    /// Session bound to a single topic/partition.
    pub fn new(addr: impl Into<String>, topic: TopicPartition) -> Self {
        Self::multi(addr, vec![topic])
    }

    /// Session bound to an ordered list of topic/partitions. Multi-fetch
    /// responses are drained in exactly this order.
    pub fn multi(addr: impl Into<String>, topics: Vec<TopicPartition>) -> Self {
        Self {
            addr: addr.into(),
            topics,
            conn: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn topics(&self) -> &[TopicPartition] {
        &self.topics
    }

    pub(crate) fn topics_mut(&mut self) -> &mut [TopicPartition] {
        &mut self.topics
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Open the TCP connection if it is not already open.
    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::Connect(e.kind()))?;
        debug!(addr = %self.addr, "connected to broker");
        self.conn = Some(stream);
        Ok(())
    }

    /// Drop the connection. The next send reconnects.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!(addr = %self.addr, "closed broker connection");
        }
    }

    /// Write a fully framed request, connecting first if needed.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.connect().await?;
        let conn = self.stream()?;
        conn.write_all(frame)
            .await
            .map_err(|e| Error::Io(e.kind()))?;
        trace!(len = frame.len(), "wrote request frame");
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Protocol("session is not connected".to_string()))
    }

    /// Read one size-prefixed response frame off the connection.
    ///
    /// EOF on the size prefix is a clean stream end and maps to
    /// `Error::Io(UnexpectedEof)`; EOF inside the body is a protocol error.
    async fn read_frame(&mut self) -> Result<(Bytes, u32)> {
        let conn = self.stream()?;

        let mut size_buf = [0u8; 4];
        conn.read_exact(&mut size_buf)
            .await
            .map_err(|e| Error::Io(e.kind()))?;
        let size = u32::from_be_bytes(size_buf);

        if size < RESPONSE_ERROR_CODE_SIZE as u32 {
            return Err(Error::Protocol(format!(
                "response shorter than a header: {size} bytes"
            )));
        }
        if size > MAX_RESPONSE_SIZE {
            return Err(Error::Protocol(format!(
                "response length {size} exceeds maximum {MAX_RESPONSE_SIZE}"
            )));
        }

        trace!(size, "reading response frame");
        let mut data = vec![0u8; size as usize];
        conn.read_exact(&mut data).await.map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Error::Protocol("connection closed mid-response".to_string())
            }
            kind => Error::Io(kind),
        })?;

        Ok((Bytes::from(data), size))
    }

    /// Read a single-fetch (or offsets) response into a set reader.
    pub async fn read_response(&mut self) -> Result<MessageSetReader> {
        let (frame, size) = self.read_frame().await?;
        Ok(MessageSetReader::new(frame, size, 1))
    }

    /// Read a multi-fetch response into a set reader expecting one
    /// per-partition set per bound topic.
    pub async fn read_multi_response(&mut self) -> Result<MessageSetReader> {
        let sets = self.topics.len();
        let (frame, size) = self.read_frame().await?;
        Ok(MessageSetReader::new(frame, size, sets))
    }

    fn first_topic(&self) -> Result<&TopicPartition> {
        self.topics
            .first()
            .ok_or_else(|| Error::Protocol("session has no topic bindings".to_string()))
    }

    /// PRODUCE frame for a single message, addressed to the first binding.
    pub fn encode_produce_request(&self, message: &Message) -> Result<Vec<u8>> {
        let tp = self.first_topic()?;
        let mut frame = RequestFrame::new(RequestType::Produce);
        let buf = frame.body_mut();
        encode_topic_header(buf, &tp.topic, tp.partition)?;
        let encoded = message.encode();
        (encoded.len() as u32).encode(buf)?;
        encoded.as_slice().encode(buf)?;
        frame.finish()
    }

    /// MULTI-PRODUCE frame covering every `(topic, partition)` section of
    /// the request. Section order follows map iteration order; the wire
    /// format attaches no meaning to it.
    pub fn encode_multi_produce_request(&self, request: &ProduceRequest) -> Result<Vec<u8>> {
        let sections: usize = request.values().map(|partitions| partitions.len()).sum();
        let mut frame = RequestFrame::new(RequestType::MultiProduce);
        let buf = frame.body_mut();
        (sections as u16).encode(buf)?;
        for (topic, partitions) in request {
            for (partition, messages) in partitions {
                encode_topic_header(buf, topic, *partition)?;
                let mut set = Vec::new();
                for mt in messages {
                    set.extend_from_slice(&mt.message.encode());
                }
                (set.len() as u32).encode(buf)?;
                set.as_slice().encode(buf)?;
            }
        }
        frame.finish()
    }

    /// FETCH frame for the first binding, using its offset and max size.
    pub fn encode_fetch_request(&self) -> Result<Vec<u8>> {
        let tp = self.first_topic()?;
        let mut frame = RequestFrame::new(RequestType::Fetch);
        let buf = frame.body_mut();
        encode_topic_header(buf, &tp.topic, tp.partition)?;
        tp.offset.encode(buf)?;
        tp.max_size.encode(buf)?;
        frame.finish()
    }

    /// MULTI-FETCH frame covering every binding, in session order.
    pub fn encode_multi_fetch_request(&self) -> Result<Vec<u8>> {
        let mut frame = RequestFrame::new(RequestType::MultiFetch);
        let buf = frame.body_mut();
        (self.topics.len() as u16).encode(buf)?;
        for tp in &self.topics {
            encode_topic_header(buf, &tp.topic, tp.partition)?;
            tp.offset.encode(buf)?;
            tp.max_size.encode(buf)?;
        }
        frame.finish()
    }

    /// OFFSETS frame for the first binding. `time` is milliseconds since
    /// the epoch, or the special values -1 (latest) and -2 (earliest).
    pub fn encode_offsets_request(&self, time: i64, max_offsets: u32) -> Result<Vec<u8>> {
        let tp = self.first_topic()?;
        let mut frame = RequestFrame::new(RequestType::Offsets);
        let buf = frame.body_mut();
        encode_topic_header(buf, &tp.topic, tp.partition)?;
        time.encode(buf)?;
        max_offsets.encode(buf)?;
        frame.finish()
    }
}
