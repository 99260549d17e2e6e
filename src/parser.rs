//! Deserialize data from the wire protocol.

use nom::{
    multi::many_m_n,
    number::complete::{be_i16, be_u32, be_u64},
    IResult,
};
use nombytes::NomBytes;

use crate::constants::MAX_OFFSETS_PER_RESPONSE;

/// Parse the 2-byte error code opening every response frame.
pub fn parse_error_code(s: NomBytes) -> IResult<NomBytes, i16> {
    be_i16(s)
}

/// Parse a multi-fetch per-partition set header:
/// `[4-byte set length][2-byte error code]`.
///
/// The set length on the wire covers its own trailing 2-byte error code in
/// addition to the message bytes.
pub fn parse_set_header(s: NomBytes) -> IResult<NomBytes, (u32, i16)> {
    let (s, length) = be_u32(s)?;
    let (s, code) = be_i16(s)?;
    Ok((s, (length, code)))
}

/// Parse an offsets-response payload: `[4-byte count][count x 8-byte offsets]`.
///
/// Tolerates payloads carrying fewer offsets than the count claims; the
/// claimed count itself is validated against [`MAX_OFFSETS_PER_RESPONSE`].
pub fn parse_offsets(s: NomBytes) -> IResult<NomBytes, Vec<u64>> {
    let (s, count) = be_u32(s)?;

    if count > MAX_OFFSETS_PER_RESPONSE {
        return Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    many_m_n(0, count as usize, be_u64)(s)
}
