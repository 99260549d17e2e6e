//! Wire protocol compatibility integration tests.
//!
//! These tests pin the client's encodings to reference bytes produced by
//! other 0.7-era protocol implementations, and exercise the producer and
//! consumer drivers against a scripted in-process broker over a loopback
//! socket.
//!
//! # Wire Format
//!
//! Every request frame:
//! ```text
//! [length: u32] [request_type: u16] [body]
//! ```
//!
//! Every message frame:
//! ```text
//! [length: u32] [magic: u8] [compression: u8, magic 1 only] [crc32: u32] [payload]
//! ```
//!
//! # Running Tests
//!
//! ```sh
//! cargo test --test wire_protocol_tests
//! ```

use bytes::BufMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use kafka7::message::{decode_with_default_codecs, Message};
use kafka7::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

/// The message "testing" as encoded by kafka-rb and the Go client.
const TESTING_FRAME: [u8; 17] = [
    0x00, 0x00, 0x00, 0x0D, 0x01, 0x00, 0xE8, 0xF3, 0x5A, 0x06, 0x74, 0x65, 0x73, 0x74, 0x69,
    0x6E, 0x67,
];

/// Frame a fetch/offsets response: `[length][error code][body]`.
fn response_frame(code: i16, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + body.len());
    frame.put_u32((2 + body.len()) as u32);
    frame.put_i16(code);
    frame.put_slice(body);
    frame
}

/// A per-partition section of a multi-fetch response:
/// `[set length][set error code][message set]`. The set length covers the
/// 2-byte error code plus the message bytes.
fn partition_set(code: i16, messages: &[u8]) -> Vec<u8> {
    let mut set = Vec::with_capacity(6 + messages.len());
    set.put_u32((2 + messages.len()) as u32);
    set.put_i16(code);
    set.put_slice(messages);
    set
}

/// Read one size-prefixed request frame off a test connection.
async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await.unwrap();
    let size = u32::from_be_bytes(size_buf) as usize;
    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).await.unwrap();
    body
}

async fn bind_broker() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

// ============================================================================
// Reference Encodings
// ============================================================================

#[test]
fn test_message_encoding_reference() {
    assert_eq!(Message::new("testing").encode(), TESTING_FRAME);
}

#[test]
fn test_magic0_decode_reference() {
    let frame = [
        0x00, 0x00, 0x00, 0x0C, 0x00, 0xE8, 0xF3, 0x5A, 0x06, 0x74, 0x65, 0x73, 0x74, 0x69, 0x6E,
        0x67,
    ];
    let (consumed, msgs) = decode_with_default_codecs(&frame).unwrap().unwrap();
    assert_eq!(consumed, 16);
    let msg = &msgs[0];
    assert_eq!(msg.magic(), 0);
    assert_eq!(msg.checksum(), 0xE8F35A06);
    assert_eq!(msg.payload().as_ref(), b"testing");
    assert_eq!(msg.total_len(), 16);
}

#[test]
fn test_compressed_message_equivalence() {
    let inner = Message::new("testing").encode();
    let via_codec = Message::with_codec(&inner, &GzipCodec).unwrap().encode();
    let direct = Message::compressed("testing").unwrap().encode();
    assert_eq!(direct, via_codec);
}

#[test]
fn test_compressed_roundtrip_reference() {
    let encoded = Message::compressed("testing").unwrap().encode();
    let (_, msgs) = decode_with_default_codecs(&encoded).unwrap().unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].magic(), 1);
    assert_eq!(msgs[0].checksum(), 0xE8F35A06);
    assert_eq!(msgs[0].payload().as_ref(), b"testing");
}

#[test]
fn test_long_compressed_roundtrip() {
    // bigger than any internal scratch buffer a decoder might use
    let payload: Vec<u8> = b"testing123 ".repeat(15);
    let encoded = Message::compressed(payload.clone()).unwrap().encode();
    let (_, msgs) = decode_with_default_codecs(&encoded).unwrap().unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].payload().as_ref(), payload.as_slice());
}

#[test]
fn test_compressed_set_with_many_inner_messages() {
    let inner: Vec<Message> = (0..16)
        .map(|i| Message::new(format!("inner message number {i}")))
        .collect();
    let outer = Message::compressed_set(&inner).unwrap();
    let (_, decoded) = decode_with_default_codecs(&outer.encode()).unwrap().unwrap();
    assert_eq!(decoded.len(), 16);
    for (original, decoded) in inner.iter().zip(&decoded) {
        assert_eq!(original.payload(), decoded.payload());
    }
}

#[test]
fn test_frame_length_prefix_invariant() {
    for encoded in [
        Message::new("").encode(),
        Message::new("testing").encode(),
        Message::compressed("testing").unwrap().encode(),
    ] {
        let prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(prefix as usize, encoded.len() - 4);
    }
}

// ============================================================================
// Loopback Broker: Consuming
// ============================================================================

#[tokio::test]
async fn test_consume_delivers_messages_and_advances_offset() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        // FETCH for topic "test" partition 0 offset 0
        assert_eq!(&request[..2], &[0x00, 0x01]);

        let mut body = Vec::new();
        body.extend_from_slice(&Message::new("first").encode());
        body.extend_from_slice(&Message::new("second").encode());
        // truncated trailing message: only the first half of a frame
        let mut tail = Message::new("third-will-be-cut").encode();
        tail.truncate(tail.len() / 2);
        body.extend_from_slice(&tail);

        stream.write_all(&response_frame(0, &body)).await.unwrap();
    });

    let mut consumer = BrokerConsumer::new(&addr, "test", 0, 0, 1 << 20);
    let mut seen: Vec<(String, i32, u64, Vec<u8>)> = Vec::new();
    let count = consumer
        .consume(|topic, partition, msg| {
            seen.push((
                topic.to_string(),
                partition,
                msg.offset(),
                msg.payload().to_vec(),
            ));
        })
        .await
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(seen[0].3, b"first");
    assert_eq!(seen[1].3, b"second");
    assert_eq!(seen[0].2, 0);
    // second message starts where the first frame ended
    let first_len = Message::new("first").encode().len() as u64;
    assert_eq!(seen[1].2, first_len);

    // offset advanced by exactly the two complete frames; the truncated
    // tail stays on the broker for the next fetch
    let expected = first_len + Message::new("second").encode().len() as u64;
    assert_eq!(consumer.session().topics()[0].offset, expected);
}

#[tokio::test]
async fn test_consume_header_only_response() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        stream.write_all(&response_frame(0, &[])).await.unwrap();
    });

    let mut consumer = BrokerConsumer::new(&addr, "test", 0, 0, 1 << 20);
    let count = consumer.consume(|_, _, _| {}).await.unwrap();
    assert_eq!(count, 0);
    assert_eq!(consumer.session().topics()[0].offset, 0);
}

#[tokio::test]
async fn test_consume_surfaces_server_error() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        stream.write_all(&response_frame(1, &[])).await.unwrap();
    });

    let mut consumer = BrokerConsumer::new(&addr, "test", 0, 0, 1 << 20);
    let err = consumer.consume(|_, _, _| {}).await.unwrap_err();
    assert_eq!(err, Error::Server(ServerCode::OffsetOutOfRange));
}

#[tokio::test]
async fn test_consume_connect_error() {
    // bind then drop to find a port with nothing listening
    let (listener, addr) = bind_broker().await;
    drop(listener);

    let mut consumer = BrokerConsumer::new(&addr, "test", 0, 0, 1 << 20);
    let err = consumer.consume(|_, _, _| {}).await.unwrap_err();
    assert!(matches!(err, Error::Connect(_)));
}

#[tokio::test]
async fn test_consume_decodes_compressed_sets() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;

        let inner = vec![Message::new("one"), Message::new("two")];
        let outer = Message::compressed_set(&inner).unwrap();
        stream
            .write_all(&response_frame(0, &outer.encode()))
            .await
            .unwrap();
    });

    let mut consumer = BrokerConsumer::new(&addr, "test", 0, 0, 1 << 20);
    let mut payloads = Vec::new();
    let mut offsets = Vec::new();
    let count = consumer
        .consume(|_, _, msg| {
            payloads.push(msg.payload().to_vec());
            offsets.push(msg.offset());
        })
        .await
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
    // both inner messages came from the outer frame starting at offset 0;
    // their offsets step by their own inner frame lengths
    assert_eq!(offsets[0], 0);
    assert_eq!(offsets[1], Message::new("one").encode().len() as u64);
}

#[tokio::test]
async fn test_multi_fetch_drains_partitions_in_order() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        // MULTI-FETCH for two partitions
        assert_eq!(&request[..4], &[0x00, 0x02, 0x00, 0x02]);

        let mut body = Vec::new();
        body.extend_from_slice(&partition_set(0, &Message::new("p0-a").encode()));
        let mut second = Message::new("p1-a").encode();
        second.extend_from_slice(&Message::new("p1-b").encode());
        body.extend_from_slice(&partition_set(0, &second));

        stream.write_all(&response_frame(0, &body)).await.unwrap();
    });

    let mut consumer = BrokerConsumer::partitions(&addr, "test", &[0, 1], 0, 1 << 20);
    let mut seen = Vec::new();
    let count = consumer
        .consume(|_, partition, msg| seen.push((partition, msg.payload().to_vec())))
        .await
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(
        seen,
        vec![
            (0, b"p0-a".to_vec()),
            (1, b"p1-a".to_vec()),
            (1, b"p1-b".to_vec()),
        ]
    );

    let topics = consumer.session().topics();
    assert_eq!(
        topics[0].offset,
        Message::new("p0-a").encode().len() as u64
    );
    assert_eq!(
        topics[1].offset,
        (Message::new("p1-a").encode().len() + Message::new("p1-b").encode().len()) as u64
    );
}

#[tokio::test]
async fn test_multi_fetch_skips_partition_with_error_code() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;

        let mut body = Vec::new();
        body.extend_from_slice(&partition_set(1, &Message::new("unreachable").encode()));
        body.extend_from_slice(&partition_set(0, &Message::new("delivered").encode()));

        stream.write_all(&response_frame(0, &body)).await.unwrap();
    });

    let mut consumer = BrokerConsumer::partitions(&addr, "test", &[0, 1], 0, 1 << 20);
    let mut seen = Vec::new();
    let count = consumer
        .consume(|_, partition, msg| seen.push((partition, msg.payload().to_vec())))
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(seen, vec![(1, b"delivered".to_vec())]);
    // the errored partition's offset did not move
    assert_eq!(consumer.session().topics()[0].offset, 0);
}

#[tokio::test]
async fn test_offset_monotonicity_across_fetches() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        for payload in ["first fetch", "second fetch"] {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut stream).await;
            let message = Message::new(payload);
            stream
                .write_all(&response_frame(0, &message.encode()))
                .await
                .unwrap();
        }
    });

    let mut consumer = BrokerConsumer::new(&addr, "test", 0, 0, 1 << 20);

    consumer.consume(|_, _, _| {}).await.unwrap();
    let after_first = consumer.session().topics()[0].offset;
    assert_eq!(after_first, Message::new("first fetch").encode().len() as u64);

    consumer.consume(|_, _, _| {}).await.unwrap();
    let after_second = consumer.session().topics()[0].offset;
    assert_eq!(
        after_second,
        after_first + Message::new("second fetch").encode().len() as u64
    );
}

#[tokio::test]
async fn test_get_offsets() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        // OFFSETS request type
        assert_eq!(&request[..2], &[0x00, 0x04]);

        let mut body = Vec::new();
        body.put_u32(2);
        body.put_u64(1024);
        body.put_u64(0);
        stream.write_all(&response_frame(0, &body)).await.unwrap();
    });

    let mut consumer = BrokerConsumer::offset_query(&addr, "test", 0);
    let offsets = consumer
        .get_offsets(kafka7::constants::OFFSET_LATEST, 10)
        .await
        .unwrap();
    assert_eq!(offsets, vec![1024, 0]);
}

#[tokio::test]
async fn test_consume_on_channel_quit_teardown() {
    let (listener, addr) = bind_broker().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // first poll gets one message, later polls get header-only responses
        read_request(&mut stream).await;
        stream
            .write_all(&response_frame(0, &Message::new("delivered").encode()))
            .await
            .unwrap();
        loop {
            let mut size_buf = [0u8; 4];
            if stream.read_exact(&mut size_buf).await.is_err() {
                return; // consumer closed the connection on quit
            }
            let mut body = vec![0u8; u32::from_be_bytes(size_buf) as usize];
            if stream.read_exact(&mut body).await.is_err() {
                return;
            }
            if stream.write_all(&response_frame(0, &[])).await.is_err() {
                return;
            }
        }
    });

    let consumer = BrokerConsumer::new(&addr, "test", 0, 0, 1 << 20);
    let (tx, mut rx) = mpsc::channel(16);
    let (quit_tx, quit_rx) = oneshot::channel();

    let driver = tokio::spawn(consumer.consume_on_channel(tx, 10, quit_rx));

    let first = rx.recv().await.expect("message should arrive");
    assert_eq!(first.payload().as_ref(), b"delivered");

    quit_tx.send(()).unwrap();
    let delivered = driver.await.unwrap().unwrap();
    assert_eq!(delivered, 1);

    // the consumer closed the channel on teardown
    assert!(rx.recv().await.is_none());
}

// ============================================================================
// Loopback Broker: Publishing
// ============================================================================

#[tokio::test]
async fn test_publish_writes_reference_frame() {
    let (listener, addr) = bind_broker().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await
    });

    let mut producer = BrokerProducer::new(&addr, "test", 0);
    producer.publish(&Message::new("testing")).await.unwrap();
    // single publish is fire-and-forget over a short-lived connection
    assert!(!producer.session().is_connected());

    let request = server.await.unwrap();
    let mut expected = vec![
        0x00, 0x00, // request type: produce
        0x00, 0x04, 0x74, 0x65, 0x73, 0x74, // topic "test"
        0x00, 0x00, 0x00, 0x00, // partition 0
        0x00, 0x00, 0x00, 0x11, // message set length
    ];
    expected.extend_from_slice(&TESTING_FRAME);
    assert_eq!(request, expected);
}

#[tokio::test]
async fn test_publish_on_channel_flush_count_and_done() {
    let (listener, addr) = bind_broker().await;

    let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<u8>>(4);
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        loop {
            let mut size_buf = [0u8; 4];
            if stream.read_exact(&mut size_buf).await.is_err() {
                return; // producer closed the connection after the last flush
            }
            let mut body = vec![0u8; u32::from_be_bytes(size_buf) as usize];
            if stream.read_exact(&mut body).await.is_err() {
                return;
            }
            if frames_tx.send(body).await.is_err() {
                return;
            }
        }
    });

    let producer = BrokerProducer::new(&addr, "test", 0);
    let (tx, rx) = mpsc::channel(16);
    let (done_tx, done_rx) = oneshot::channel();

    // long interval so only the count threshold and done signal flush
    let driver = tokio::spawn(producer.publish_on_channel(rx, 60_000, 2, done_rx));

    tx.send(MessageTopic::new("test", "a")).await.unwrap();
    tx.send(MessageTopic::new("test", "b")).await.unwrap();
    // the count threshold flushes the first two before the third is queued
    let first = frames_rx.recv().await.unwrap();
    tx.send(MessageTopic::new("test", "c")).await.unwrap();
    done_tx.send(()).unwrap();
    let second = frames_rx.recv().await.unwrap();

    let published = driver.await.unwrap().unwrap();
    assert_eq!(published, 3);
    // both frames are multi-produce with a single partition section
    for frame in [&first, &second] {
        assert_eq!(&frame[..4], &[0x00, 0x03, 0x00, 0x01]);
    }
    // first flush carried two messages, the forced one carried the third
    let msg_len = Message::new("a").encode().len();
    let section_overhead = 10 + 4; // topic header + set length
    assert_eq!(first.len(), 4 + section_overhead + 2 * msg_len);
    assert_eq!(second.len(), 4 + section_overhead + msg_len);
}

#[tokio::test]
async fn test_publish_on_channel_compressed() {
    let (listener, addr) = bind_broker().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await
    });

    let producer = BrokerProducer::new(&addr, "test", 0).with_compression(1);
    let (tx, rx) = mpsc::channel(16);
    let (done_tx, done_rx) = oneshot::channel();

    let driver = tokio::spawn(producer.publish_on_channel(rx, 60_000, 100, done_rx));

    tx.send(MessageTopic::new("test", "one")).await.unwrap();
    tx.send(MessageTopic::new("test", "two")).await.unwrap();
    done_tx.send(()).unwrap();

    let published = driver.await.unwrap().unwrap();
    assert_eq!(published, 2);

    let request = server.await.unwrap();
    assert_eq!(&request[..4], &[0x00, 0x03, 0x00, 0x01]);

    // the partition section holds exactly one outer message; decoding it
    // yields both inner payloads in order
    let set_length = u32::from_be_bytes([request[14], request[15], request[16], request[17]]);
    let set = &request[18..18 + set_length as usize];
    let (consumed, inner) = decode_with_default_codecs(set).unwrap().unwrap();
    assert_eq!(consumed, set.len());
    let payloads: Vec<&[u8]> = inner.iter().map(|m| m.payload().as_ref()).collect();
    assert_eq!(payloads, vec![&b"one"[..], &b"two"[..]]);
}
