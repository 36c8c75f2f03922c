//! Variable-length integers used inside replication log entries.
//!
//! Each byte carries 7 data bits; the top bit is set on every byte except the
//! last. Groups are written most-significant first, so `300` is `0x82 0x2c`.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut};

/// Longest encoding of a `u64` (10 groups of 7 bits).
pub const MAX_VARINT_LEN: usize = 10;

/// Reads one varint from the front of `buf`, advancing past it.
pub fn get_varint(buf: &mut impl Buf) -> Result<u64, ProtocolError> {
    let mut value: u64 = 0;

    for _ in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(ProtocolError::Malformed("truncated varint".to_string()));
        }

        let byte = buf.get_u8();
        value = (value << 7) | u64::from(byte & 0x7f);

        if byte < 0x80 {
            return Ok(value);
        }
    }

    Err(ProtocolError::Malformed(format!(
        "varint longer than {} bytes",
        MAX_VARINT_LEN
    )))
}

/// Appends `value` to `buf` as a varint.
pub fn put_varint(buf: &mut impl BufMut, value: u64) {
    let mut groups = [0u8; MAX_VARINT_LEN];
    let mut n = 0;
    let mut rest = value;

    loop {
        groups[n] = (rest & 0x7f) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }

    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0x00 };
        buf.put_u8(groups[i] | continuation);
    }
}
