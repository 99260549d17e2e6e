//! Core protocol types shared by the producer and consumer drivers.

use bytes::BufMut;
use std::collections::HashMap;
use std::fmt;

use crate::constants::DEFAULT_MAX_FETCH_SIZE;
use crate::encode::ToByte;
use crate::error::Result;
use crate::message::Message;

/// Wire request types of the 0.7-era protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Produce = 0,
    Fetch = 1,
    MultiFetch = 2,
    MultiProduce = 3,
    Offsets = 4,
}

impl ToByte for RequestType {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        (*self as u16).encode(buffer)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestType::Produce => "produce",
            RequestType::Fetch => "fetch",
            RequestType::MultiFetch => "multi-fetch",
            RequestType::MultiProduce => "multi-produce",
            RequestType::Offsets => "offsets",
        };
        f.write_str(name)
    }
}

/// A single `(topic, partition)` binding carried by a broker session.
///
/// `offset` and `max_size` drive fetches and are unused for produce. The
/// consumer driver is the only mutator of `offset`: after each successful
/// fetch it advances by exactly the bytes consumed from that partition's
/// message set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
    pub max_size: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: u64, max_size: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            max_size,
        }
    }

    /// Binding for produce-only sessions, where offset and max-size are
    /// never consulted.
    pub fn for_produce(topic: impl Into<String>, partition: i32) -> Self {
        Self::new(topic, partition, 0, 0)
    }

    /// Binding starting at the beginning of the partition log with the
    /// default fetch size.
    pub fn from_start(topic: impl Into<String>, partition: i32) -> Self {
        Self::new(topic, partition, 0, DEFAULT_MAX_FETCH_SIZE)
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}", self.topic, self.partition, self.offset)
    }
}

/// A message paired with its target topic, queued for publication.
///
/// The partition is normally chosen by the producer (round-robin across its
/// bound partitions); [`MessageTopic::with_partition`] pins it explicitly.
#[derive(Debug, Clone)]
pub struct MessageTopic {
    pub topic: String,
    pub partition: Option<i32>,
    pub message: Message,
}

impl MessageTopic {
    pub fn new(topic: impl Into<String>, payload: impl Into<bytes::Bytes>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            message: Message::new(payload),
        }
    }

    /// Pin the message to an explicit partition, bypassing the producer's
    /// round-robin choice.
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }
}

/// Accumulated messages for a multi-produce frame, keyed
/// `topic -> partition -> ordered messages`.
///
/// Iteration order of the maps is irrelevant to correctness; the on-wire
/// order of partition sections follows whatever order iteration yields at
/// encode time.
pub type ProduceRequest = HashMap<String, HashMap<i32, Vec<MessageTopic>>>;

/// Count every queued message across all topics and partitions.
pub fn produce_request_len(request: &ProduceRequest) -> usize {
    request
        .values()
        .flat_map(|partitions| partitions.values())
        .map(|msgs| msgs.len())
        .sum()
}
