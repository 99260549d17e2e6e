//! # kafka7
//! Rust-native client for the 0.7-era Kafka wire protocol.
//!
//! This crate implements the early binary protocol spoken by pre-0.8 Kafka
//! brokers: magic 0/1 message frames with per-message CRC32 checksums,
//! recursive gzip-compressed message sets, and the five request types
//! (produce, fetch, multi-fetch, multi-produce, offsets). Each client is
//! bound to a single broker address; there is no ZooKeeper coordination,
//! no cluster metadata, and produce is fire-and-forget.
//!
//! # Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/), [Nom](https://docs.rs/nom/latest/nom/)
//! - Byte-faithful encoding of the 0.7-era wire format
//! - Be a building block for tools that speak to legacy brokers
//!
//! ## Consuming
//! A [`BrokerConsumer`](consumer::BrokerConsumer) fetches from one or more
//! `(topic, partition)` streams, advancing its per-partition byte offsets
//! as message sets are drained.
//!
//! ```rust,no_run
//! use kafka7::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut consumer = BrokerConsumer::new("localhost:9092", "test", 0, 0, 1 << 20);
//!     let count = consumer
//!         .consume(|topic, partition, msg| {
//!             println!("{}-{} @ {}: {:?}", topic, partition, msg.offset(), msg.payload());
//!         })
//!         .await?;
//!     println!("consumed {count} messages");
//!     Ok(())
//! }
//! ```
//!
//! ## Publishing
//! A [`BrokerProducer`](producer::BrokerProducer) publishes single messages
//! or batches a delivery channel into multi-produce frames.
//!
//! ```rust,no_run
//! use kafka7::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut producer = BrokerProducer::new("localhost:9092", "test", 0);
//!     producer.publish(&Message::new("hello")).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Resources
//! - [A Guide To The Kafka Protocol](https://cwiki.apache.org/confluence/display/KAFKA/A+Guide+To+The+Kafka+Protocol)

#![forbid(unsafe_code)]

mod encode;
mod parser;

pub mod broker;
pub mod codec;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod message;
pub mod message_set;
pub mod producer;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main exports of the client.

    pub use crate::codec::{default_codecs, CodecMap, GzipCodec, NoopCodec, PayloadCodec};
    pub use crate::consumer::BrokerConsumer;
    pub use crate::error::{Error, Result, ServerCode};
    pub use crate::message::Message;
    pub use crate::producer::BrokerProducer;
    pub use crate::types::{MessageTopic, ProduceRequest, TopicPartition};

    pub use bytes;
}
