//! Centralized protocol and configuration constants.
//!
//! This module consolidates the magic numbers used throughout the client.
//! Having them in one place makes it easier to:
//!
//! - Understand the wire-format constraints
//! - Update values consistently
//!
//! # Categories
//!
//! - **Protocol Constants**: 0.7-era Kafka wire format sizes
//! - **Network Constants**: frame size limits
//! - **Driver Constants**: consumer/producer loop defaults

// =============================================================================
// Protocol Constants (0.7-era Kafka Wire Format)
// =============================================================================

/// Size of the message header after the length prefix for magic 1 frames:
/// magic (1) + compression (1) + checksum (4).
pub const MSG_HEADER_SIZE_MAGIC1: usize = 6;

/// Size of the message header after the length prefix for magic 0 frames:
/// magic (1) + checksum (4). Magic 0 carries no compression byte.
pub const MSG_HEADER_SIZE_MAGIC0: usize = 5;

/// Size of the length prefix preceding every message frame.
pub const MSG_LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the request preamble after the length prefix: the 2-byte
/// request type.
pub const REQUEST_TYPE_SIZE: usize = 2;

/// Size of the error code carried at the start of every response frame.
pub const RESPONSE_ERROR_CODE_SIZE: usize = 2;

/// Message format version written by this client. Magic 0 frames are
/// decoded but never produced.
pub const CURRENT_MAGIC: u8 = 1;

/// Codec id meaning "no compression".
pub const NO_COMPRESSION_ID: u8 = 0;

/// Codec id for gzip payloads.
pub const GZIP_COMPRESSION_ID: u8 = 1;

/// Maximum nesting depth accepted when a compressed message's payload is
/// itself a message set containing compressed messages.
pub const MAX_COMPRESSION_DEPTH: usize = 8;

/// Offset-request time meaning "latest offset available".
pub const OFFSET_LATEST: i64 = -1;

/// Offset-request time meaning "earliest offset available".
pub const OFFSET_EARLIEST: i64 = -2;

// =============================================================================
// Network Constants
// =============================================================================

/// Maximum accepted response frame size (100 MB).
/// Prevents unbounded allocation from a malformed length prefix.
pub const MAX_RESPONSE_SIZE: u32 = 100 * 1024 * 1024;

/// Upper bound on the offset count claimed by an OFFSETS response.
pub const MAX_OFFSETS_PER_RESPONSE: u32 = 1024 * 1024;

/// Default maximum fetch size in bytes when none is given
/// (must be at least as large as the largest published message).
pub const DEFAULT_MAX_FETCH_SIZE: u32 = 1024 * 1024;

// =============================================================================
// Driver Constants
// =============================================================================

/// Consecutive-error budget for the channel consumer's poll loop. Each
/// non-EOF fetch error adds one, each productive poll subtracts two
/// (floored at zero); crossing this threshold terminates the loop.
pub const MAX_CONSECUTIVE_FETCH_ERRORS: u32 = 50;

/// Default poll interval for the channel consumer, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

/// Default flush interval for the channel producer, in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

/// Default pending-message count that forces a producer flush.
pub const DEFAULT_FLUSH_COUNT: usize = 100;
