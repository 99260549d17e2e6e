//! Producer driver: single publishes and channel-driven batching.
//!
//! A [`BrokerProducer`] owns a [`BrokerSession`] bound to one topic's
//! partitions. [`publish`] fires a single-produce frame over a short-lived
//! connection; [`publish_on_channel`] runs a batching loop that groups
//! queued messages by `(topic, partition)` and emits multi-produce frames
//! when a pending count or a flush interval is reached, optionally wrapping
//! each partition's batch in one compressed outer message.
//!
//! [`publish`]: BrokerProducer::publish
//! [`publish_on_channel`]: BrokerProducer::publish_on_channel

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::debug;

use crate::broker::BrokerSession;
use crate::codec::{self, CodecMap, PayloadCodec};
use crate::error::Result;
use crate::message::Message;
use crate::types::{produce_request_len, MessageTopic, ProduceRequest, TopicPartition};

/// Producer bound to one broker and one topic's partitions.
pub struct BrokerProducer {
    session: BrokerSession,
    partitions: Vec<i32>,
    cursor: usize,
    compression: Option<u8>,
    codecs: CodecMap,
}

impl BrokerProducer {
    /// Producer publishing to a single partition.
    pub fn new(addr: impl Into<String>, topic: impl Into<String>, partition: i32) -> Self {
        Self::partitioned(addr, topic, &[partition])
    }

    /// Producer spreading messages round-robin across `partitions`.
    pub fn partitioned(
        addr: impl Into<String>,
        topic: impl Into<String>,
        partitions: &[i32],
    ) -> Self {
        let topic = topic.into();
        let topics = partitions
            .iter()
            .map(|&p| TopicPartition::for_produce(topic.clone(), p))
            .collect();
        Self {
            session: BrokerSession::multi(addr, topics),
            partitions: partitions.to_vec(),
            cursor: 0,
            compression: None,
            codecs: codec::default_codecs(),
        }
    }

    /// Wrap each flushed partition batch in one outer message compressed
    /// with the codec registered under `id`.
    pub fn with_compression(mut self, id: u8) -> Self {
        self.compression = Some(id);
        self
    }

    /// Merge custom payload codecs into the registry, overriding built-ins
    /// on id collision. Must be called before the first publish.
    pub fn add_codecs(&mut self, codecs: Vec<Arc<dyn PayloadCodec>>) {
        codec::merge_codecs(&mut self.codecs, codecs);
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    /// Publish one message with a single-produce frame. Produce responses
    /// do not exist in this protocol version, so the write is
    /// fire-and-forget and the connection is closed afterwards.
    pub async fn publish(&mut self, message: &Message) -> Result<()> {
        let frame = self.session.encode_produce_request(message)?;
        self.session.send(&frame).await?;
        self.session.close();
        Ok(())
    }

    /// Publish an accumulated request with a multi-produce frame, keeping
    /// the connection open for subsequent publishes.
    pub async fn publish_request(&mut self, request: &ProduceRequest) -> Result<()> {
        let frame = self.session.encode_multi_produce_request(request)?;
        self.session.send(&frame).await
    }

    /// Batch messages arriving on `messages` into multi-produce frames.
    ///
    /// A flush happens when the pending count reaches `flush_count`, when
    /// `flush_interval_ms` elapses with at least one message pending, or
    /// when `done` fires; the done path drains whatever is already queued on
    /// the channel before the final flush, so every message enqueued before
    /// the signal is published. Returns the total number of messages
    /// published. Messages for the same `(topic, partition)` keep their
    /// arrival order; across partitions no ordering is promised.
    pub async fn publish_on_channel(
        mut self,
        mut messages: mpsc::Receiver<MessageTopic>,
        flush_interval_ms: u64,
        flush_count: usize,
        mut done: oneshot::Receiver<()>,
    ) -> Result<usize> {
        let mut pending: ProduceRequest = HashMap::new();
        let mut published = 0usize;
        let mut ticker = time::interval(Duration::from_millis(flush_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = messages.recv() => match received {
                    Some(mt) => {
                        self.enqueue(&mut pending, mt);
                        if produce_request_len(&pending) >= flush_count {
                            published += self.flush(&mut pending).await?;
                        }
                    }
                    None => {
                        // senders gone: flush the remainder and exit
                        published += self.flush(&mut pending).await?;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    published += self.flush(&mut pending).await?;
                }
                _ = &mut done => {
                    while let Ok(mt) = messages.try_recv() {
                        self.enqueue(&mut pending, mt);
                    }
                    published += self.flush(&mut pending).await?;
                    break;
                }
            }
        }

        self.session.close();
        debug!(published, "publish loop finished");
        Ok(published)
    }

    fn enqueue(&mut self, pending: &mut ProduceRequest, mt: MessageTopic) {
        let partition = match mt.partition {
            Some(p) => p,
            None => self.next_partition(),
        };
        pending
            .entry(mt.topic.clone())
            .or_default()
            .entry(partition)
            .or_default()
            .push(mt);
    }

    fn next_partition(&mut self) -> i32 {
        if self.partitions.is_empty() {
            return 0;
        }
        let partition = self.partitions[self.cursor % self.partitions.len()];
        self.cursor = self.cursor.wrapping_add(1);
        partition
    }

    /// Frame and send everything pending, emptying the accumulator.
    /// Returns the number of messages flushed; zero pending is a no-op.
    async fn flush(&mut self, pending: &mut ProduceRequest) -> Result<usize> {
        let count = produce_request_len(pending);
        if count == 0 {
            return Ok(0);
        }

        let frame = match self.compression {
            Some(id) => {
                let wrapped = self.wrap_compressed(pending, id)?;
                self.session.encode_multi_produce_request(&wrapped)?
            }
            None => self.session.encode_multi_produce_request(pending)?,
        };
        self.session.send(&frame).await?;
        pending.clear();
        debug!(count, "flushed produce batch");
        Ok(count)
    }

    /// Collapse each `(topic, partition)` group into one outer compressed
    /// message wrapping the group's encoded message set.
    fn wrap_compressed(&self, pending: &ProduceRequest, id: u8) -> Result<ProduceRequest> {
        let codec = codec::lookup(&self.codecs, id)?;
        let mut wrapped: ProduceRequest = HashMap::new();
        for (topic, partitions) in pending {
            for (partition, queued) in partitions {
                let mut set = Vec::new();
                for mt in queued {
                    set.extend_from_slice(&mt.message.encode());
                }
                let outer = Message::with_codec(&set, codec.as_ref())?;
                wrapped
                    .entry(topic.clone())
                    .or_default()
                    .entry(*partition)
                    .or_default()
                    .push(MessageTopic {
                        topic: topic.clone(),
                        partition: Some(*partition),
                        message: outer,
                    });
            }
        }
        Ok(wrapped)
    }
}
