//! Payload compression codecs.
//!
//! A codec maps a 1-byte wire id to an encode/decode pair over raw payload
//! bytes. Two are built in: id 0 (identity) and id 1 (gzip). Custom codecs
//! are merged over the defaults with [`merge_codecs`], overriding built-ins
//! on id collision; the merge must happen before the consumer's first fetch.
//!
//! During decode, an id with no registered codec is a [`Error::Codec`];
//! during encode the producer only ever uses ids it was configured with.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::constants::{GZIP_COMPRESSION_ID, NO_COMPRESSION_ID};
use crate::error::{Error, Result};

/// An encode/decode pair registered under a 1-byte wire id.
pub trait PayloadCodec: Send + Sync {
    /// The compression byte this codec claims in magic-1 message headers.
    fn id(&self) -> u8;

    /// Encode raw payload bytes into their wire form.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decode wire payload bytes back into their raw form.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Registry mapping compression ids to codecs.
pub type CodecMap = HashMap<u8, Arc<dyn PayloadCodec>>;

/// The identity codec, wire id 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCodec;

impl PayloadCodec for NoopCodec {
    fn id(&self) -> u8 {
        NO_COMPRESSION_ID
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// The gzip codec, wire id 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCodec;

impl PayloadCodec for GzipCodec {
    fn id(&self) -> u8 {
        GZIP_COMPRESSION_ID
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| Error::Codec(format!("gzip encode: {e}")))?;
        encoder
            .finish()
            .map_err(|e| Error::Codec(format!("gzip encode: {e}")))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::Codec(format!("gzip decode: {e}")))?;
        Ok(out)
    }
}

/// Registry with the built-in codecs (identity and gzip).
pub fn default_codecs() -> CodecMap {
    let mut map: CodecMap = HashMap::new();
    map.insert(NO_COMPRESSION_ID, Arc::new(NoopCodec));
    map.insert(GZIP_COMPRESSION_ID, Arc::new(GzipCodec));
    map
}

/// Merge custom codecs into a registry. Entries with colliding ids replace
/// the existing codec, so a custom registration can override a built-in.
pub fn merge_codecs(map: &mut CodecMap, codecs: Vec<Arc<dyn PayloadCodec>>) {
    for codec in codecs {
        map.insert(codec.id(), codec);
    }
}

/// Look up a codec for decode, failing on an unregistered id.
pub fn lookup<'a>(map: &'a CodecMap, id: u8) -> Result<&'a Arc<dyn PayloadCodec>> {
    map.get(&id)
        .ok_or_else(|| Error::Codec(format!("no codec registered for compression id {id}")))
}
