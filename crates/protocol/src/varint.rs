//! Signed variable-length integers.
//!
//! Values are zig-zag mapped and then written as base-128 groups, least
//! significant first, with the high bit set on every byte but the last.
//! This is the encoding used by the `Size` frame.

/// Maximum encoded length of a 64-bit value.
pub const MAX_VARINT_LEN: usize = 10;

/// Errors produced when decoding a varint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VarintError {
    #[error("empty varint")]
    Empty,

    #[error("truncated varint")]
    Truncated,

    #[error("varint overflows 64 bits")]
    Overflow,

    #[error("{0} trailing bytes after varint")]
    TrailingBytes(usize),
}

/// Encodes `value` using the smallest possible number of bytes.
pub fn encode_varint(value: i64) -> Vec<u8> {
    let mut ux = (value as u64) << 1;
    if value < 0 {
        ux = !ux;
    }

    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    while ux >= 0x80 {
        out.push((ux as u8) | 0x80);
        ux >>= 7;
    }
    out.push(ux as u8);
    out
}

/// Decodes a varint from the start of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_varint(buf: &[u8]) -> Result<(i64, usize), VarintError> {
    if buf.is_empty() {
        return Err(VarintError::Empty);
    }

    let mut ux: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(VarintError::Overflow);
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(VarintError::Overflow);
            }
            ux |= u64::from(b) << shift;
            let mut value = (ux >> 1) as i64;
            if ux & 1 != 0 {
                value = !value;
            }
            return Ok((value, i + 1));
        }
        ux |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }

    Err(VarintError::Truncated)
}
