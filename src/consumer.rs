//! Consumer driver: fetch loops, offset tracking, handler dispatch.
//!
//! A [`BrokerConsumer`] owns a [`BrokerSession`] and drives single- or
//! multi-fetch requests over it, advancing each partition binding's offset
//! by exactly the bytes consumed from its message set. Messages are
//! dispatched to a handler callback in broker log order within a partition;
//! across partitions a multi-fetch is drained partition-by-partition in
//! session binding order, never interleaved.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, trace, warn};

use crate::broker::BrokerSession;
use crate::codec::{self, CodecMap, PayloadCodec};
use crate::constants::{MAX_CONSECUTIVE_FETCH_ERRORS, RESPONSE_ERROR_CODE_SIZE};
use crate::error::{Error, Result, ServerCode};
use crate::message::Message;
use crate::parser;
use crate::types::TopicPartition;

/// Consumer bound to one broker and one or more topic/partitions.
pub struct BrokerConsumer {
    session: BrokerSession,
    codecs: CodecMap,
}

impl BrokerConsumer {
    /// Consumer for a single topic/partition starting at `offset`.
    ///
    /// `max_size` bounds each fetch and must be at least as large as the
    /// largest message published to the partition.
    pub fn new(
        addr: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
        offset: u64,
        max_size: u32,
    ) -> Self {
        let tp = TopicPartition::new(topic, partition, offset, max_size);
        Self {
            session: BrokerSession::new(addr, tp),
            codecs: codec::default_codecs(),
        }
    }

    /// Consumer over an explicit list of topic/partition bindings.
    pub fn multi(addr: impl Into<String>, topics: Vec<TopicPartition>) -> Self {
        Self {
            session: BrokerSession::multi(addr, topics),
            codecs: codec::default_codecs(),
        }
    }

    /// Consumer over several partitions of one topic, all starting at the
    /// same offset with the same fetch bound.
    pub fn partitions(
        addr: impl Into<String>,
        topic: impl Into<String>,
        partitions: &[i32],
        offset: u64,
        max_size: u32,
    ) -> Self {
        let topic = topic.into();
        let topics = partitions
            .iter()
            .map(|&p| TopicPartition::new(topic.clone(), p, offset, max_size))
            .collect();
        Self::multi(addr, topics)
    }

    /// Consumer intended only for [`get_offsets`] queries: offset and fetch
    /// bound are left at zero.
    ///
    /// [`get_offsets`]: BrokerConsumer::get_offsets
    pub fn offset_query(
        addr: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
    ) -> Self {
        Self::new(addr, topic, partition, 0, 0)
    }

    /// Merge custom payload codecs into the registry, overriding built-ins
    /// on id collision. Must be called before the first fetch.
    pub fn add_codecs(&mut self, codecs: Vec<Arc<dyn PayloadCodec>>) {
        codec::merge_codecs(&mut self.codecs, codecs);
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    /// Run one synchronous fetch, dispatching every decoded message to
    /// `handler` as `(topic, partition, message)`. Returns the number of
    /// messages handled; partition offsets advance by the bytes consumed.
    pub async fn consume<F>(&mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(&str, i32, &Message),
    {
        self.session.connect().await?;
        let result = self.fetch_once(&mut handler).await;
        self.session.close();
        if let Err(ref e) = result {
            error!(error = %e, "consume failed");
        }
        result
    }

    /// Poll the broker on an interval, publishing every decoded message to
    /// `messages` until `quit` fires (or its sender is dropped).
    ///
    /// Fetch errors other than a clean end-of-stream feed a consecutive
    /// error budget: each failure adds one, each productive poll subtracts
    /// two (floored at zero), and crossing
    /// [`MAX_CONSECUTIVE_FETCH_ERRORS`] terminates the loop with the last
    /// error. The quit signal is observed at poll boundaries; the channel
    /// closes when this future returns, and the cumulative delivered count
    /// is the return value.
    pub async fn consume_on_channel(
        mut self,
        messages: mpsc::Sender<Message>,
        poll_timeout_ms: u64,
        mut quit: oneshot::Receiver<()>,
    ) -> Result<usize> {
        self.session.connect().await?;

        // Double poll-interval settle sleep before the first fetch. The
        // original protocol clients did this to ride out a broker warm-up
        // race after accept; kept for wire-compatible behavior.
        time::sleep(Duration::from_millis(poll_timeout_ms.saturating_mul(2))).await;

        let mut delivered = 0usize;
        let mut error_budget: u32 = 0;

        loop {
            let mut batch: Vec<Message> = Vec::new();
            let fetched = self
                .fetch_once(&mut |_topic: &str, _partition: i32, msg: &Message| {
                    batch.push(msg.clone());
                })
                .await;

            match fetched {
                Ok(n) => {
                    // only a poll that made progress pays down the budget;
                    // an idle connection must not mask real errors
                    if n > 0 {
                        error_budget = error_budget.saturating_sub(2);
                    }
                }
                Err(e) if e.is_clean_eof() => {
                    trace!("stream ended cleanly, polling again");
                }
                Err(e) => {
                    warn!(error = %e, error_budget, "fetch failed");
                    error_budget += 1;
                    if error_budget > MAX_CONSECUTIVE_FETCH_ERRORS {
                        error!(error = %e, "error budget exhausted, terminating poll loop");
                        self.session.close();
                        return Err(e);
                    }
                }
            }

            for message in batch {
                if messages.send(message).await.is_err() {
                    debug!("message channel receiver dropped, stopping");
                    self.session.close();
                    return Ok(delivered);
                }
                delivered += 1;
            }

            tokio::select! {
                _ = &mut quit => break,
                _ = time::sleep(Duration::from_millis(poll_timeout_ms)) => {}
            }
        }

        debug!(delivered, "quit signal received, closing consumer");
        self.session.close();
        Ok(delivered)
    }

    /// Fetch the list of valid offsets (up to `max_offsets`) before `time`,
    /// where `time` is milliseconds since the epoch, `-1` for the latest
    /// offset available, or `-2` for the earliest. Offsets are returned in
    /// descending time order, as delivered by the server.
    pub async fn get_offsets(&mut self, time: i64, max_offsets: u32) -> Result<Vec<u64>> {
        let request = self.session.encode_offsets_request(time, max_offsets)?;
        self.session.send(&request).await?;
        let mut reader = self.session.read_response().await?;
        let payload = reader.payload()?;
        self.session.close();

        if payload.len() < 4 {
            return Ok(Vec::new());
        }
        let input = nombytes::NomBytes::new(payload);
        let (_, offsets) = parser::parse_offsets(input)
            .map_err(|_| Error::Protocol("malformed offsets payload".to_string()))?;
        Ok(offsets)
    }

    async fn fetch_once<F>(&mut self, handler: &mut F) -> Result<usize>
    where
        F: FnMut(&str, i32, &Message),
    {
        if self.session.topics().len() > 1 {
            self.fetch_multi(handler).await
        } else {
            self.fetch_single(handler).await
        }
    }

    async fn fetch_single<F>(&mut self, handler: &mut F) -> Result<usize>
    where
        F: FnMut(&str, i32, &Message),
    {
        let request = self.session.encode_fetch_request()?;
        self.session.send(&request).await?;
        let mut reader = self.session.read_response().await?;

        let code = reader.read_header()?;
        if code != ServerCode::None {
            return Err(Error::Server(code));
        }
        if reader.size() <= RESPONSE_ERROR_CODE_SIZE as u32 {
            return Ok(0);
        }

        let (topic, partition, base_offset) = self.binding(0)?;
        let mut num = 0usize;
        let mut consumed_total: u64 = 0;
        loop {
            let (consumed, messages) = match reader.next_msg(&self.codecs) {
                Ok(next) => next,
                Err(e) => {
                    // keep the bytes already drained; the undecodable rest
                    // is re-requested on the next fetch
                    self.advance(0, consumed_total);
                    return Err(e);
                }
            };
            if consumed == 0 {
                // truncated trailing message: it stays on the broker and is
                // re-requested once the offset has advanced past the rest
                break;
            }
            // inner messages of a compressed frame start at the frame's
            // offset and step by their own wire lengths
            let mut msg_offset = base_offset + consumed_total;
            for mut message in messages {
                message.set_offset(msg_offset);
                msg_offset += message.total_len();
                handler(&topic, partition, &message);
                num += 1;
            }
            consumed_total += consumed as u64;
        }
        self.advance(0, consumed_total);
        trace!(topic = %topic, partition, consumed_total, num, "drained fetch response");
        Ok(num)
    }

    async fn fetch_multi<F>(&mut self, handler: &mut F) -> Result<usize>
    where
        F: FnMut(&str, i32, &Message),
    {
        let request = self.session.encode_multi_fetch_request()?;
        self.session.send(&request).await?;
        let mut reader = self.session.read_multi_response().await?;

        let code = reader.read_header()?;
        if code != ServerCode::None {
            return Err(Error::Server(code));
        }
        if reader.size() <= RESPONSE_ERROR_CODE_SIZE as u32 {
            return Ok(0);
        }

        let mut num = 0usize;
        // the server echoes per-partition sets in the session binding order
        for tpi in 0..reader.len() {
            let (set_length, set_code) = reader.read_set()?;
            if set_code != ServerCode::None {
                warn!(code = ?set_code, index = tpi, "skipping partition set with server error");
                reader.skip((set_length as usize).saturating_sub(RESPONSE_ERROR_CODE_SIZE));
                continue;
            }

            let (topic, partition, base_offset) = self.binding(tpi)?;
            let mut consumed_total: u64 = 0;
            loop {
                let (consumed, messages) = match reader.next_msg(&self.codecs) {
                    Ok(next) => next,
                    Err(e) => {
                        self.advance(tpi, consumed_total);
                        return Err(e);
                    }
                };
                if consumed == 0 {
                    self.advance(tpi, consumed_total);
                    return Ok(num);
                }
                let mut msg_offset = base_offset + consumed_total;
                for mut message in messages {
                    message.set_offset(msg_offset);
                    msg_offset += message.total_len();
                    handler(&topic, partition, &message);
                    num += 1;
                }
                consumed_total += consumed as u64;
                // the set length covers its own 2-byte error code, hence the
                // +2 in the termination check
                if consumed_total + RESPONSE_ERROR_CODE_SIZE as u64 >= set_length as u64 {
                    break;
                }
            }
            self.advance(tpi, consumed_total);
        }
        Ok(num)
    }

    fn binding(&self, index: usize) -> Result<(String, i32, u64)> {
        let tp = self
            .session
            .topics()
            .get(index)
            .ok_or_else(|| Error::Protocol(format!("no topic binding at index {index}")))?;
        Ok((tp.topic.clone(), tp.partition, tp.offset))
    }

    fn advance(&mut self, index: usize, consumed: u64) {
        if consumed == 0 {
            return;
        }
        if let Some(tp) = self.session.topics_mut().get_mut(index) {
            tp.offset += consumed;
            debug!(topic = %tp.topic, partition = tp.partition, offset = tp.offset, "advanced partition offset");
        }
    }
}
