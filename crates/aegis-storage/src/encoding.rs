//! Aegis Encoding - Order-Preserving Key Primitives
//!
//! Byte encodings for the components of composite map keys. Every encoding
//! is self-delimiting and preserves order: comparing two encoded byte
//! strings with `memcmp` gives the same result as comparing the decoded
//! values, so a composite key built by concatenating components sorts by
//! its first component, then its second, and so on.
//!
//! Key Features:
//! - Length-tagged unsigned varints (small ids stay small)
//! - Sign-flipped fixed-width signed integers
//! - Second + nanosecond timestamps, ascending or descending
//! - Escaped, terminated strings that sort lexicographically
//! - Total-order float encoding for spatial keys
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use aegis_common::{AegisError, Result};
use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};

const SIGN_BIT_64: u64 = 1 << 63;
const SIGN_BIT_32: u32 = 1 << 31;

const STRING_ESCAPE: u8 = 0x00;
const STRING_ESCAPED_NUL: u8 = 0xFF;
const STRING_TERMINATOR: u8 = 0x01;

/// Encoded width of a timestamp.
pub const TIMESTAMP_LEN: usize = 12;

fn ensure_remaining(buf: &&[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(AegisError::InvalidKey(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

// =============================================================================
// Unsigned Varints
// =============================================================================

/// Append `value` as a length byte followed by its significant big-endian
/// bytes. Zero encodes as the single byte `0x00`.
pub fn put_varint(buf: &mut Vec<u8>, value: u64) {
    let len = 8 - (value.leading_zeros() / 8) as usize;
    buf.put_u8(len as u8);
    buf.put_slice(&value.to_be_bytes()[8 - len..]);
}

pub fn get_varint(buf: &mut &[u8]) -> Result<u64> {
    ensure_remaining(buf, 1, "varint")?;
    let len = buf.get_u8() as usize;
    if len > 8 {
        return Err(AegisError::InvalidKey(format!("varint length {} exceeds 8", len)));
    }
    ensure_remaining(buf, len, "varint")?;
    let mut bytes = [0u8; 8];
    buf.copy_to_slice(&mut bytes[8 - len..]);
    Ok(u64::from_be_bytes(bytes))
}

/// Number of bytes `put_varint` writes for `value`.
pub fn varint_len(value: u64) -> usize {
    1 + 8 - (value.leading_zeros() / 8) as usize
}

// =============================================================================
// Signed Integers
// =============================================================================

pub fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.put_u64((value as u64) ^ SIGN_BIT_64);
}

pub fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    ensure_remaining(buf, 8, "i64")?;
    Ok((buf.get_u64() ^ SIGN_BIT_64) as i64)
}

// =============================================================================
// Timestamps
// =============================================================================

/// Append `t` as signed epoch seconds followed by the nanosecond fraction.
pub fn put_timestamp(buf: &mut Vec<u8>, t: &DateTime<Utc>) {
    put_i64(buf, t.timestamp());
    buf.put_u32(t.timestamp_subsec_nanos());
}

pub fn get_timestamp(buf: &mut &[u8]) -> Result<DateTime<Utc>> {
    ensure_remaining(buf, TIMESTAMP_LEN, "timestamp")?;
    let secs = get_i64(buf)?;
    let nanos = buf.get_u32();
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| AegisError::InvalidKey(format!("timestamp out of range: {}s {}ns", secs, nanos)))
}

/// Append `t` so that later instants sort first.
pub fn put_timestamp_desc(buf: &mut Vec<u8>, t: &DateTime<Utc>) {
    let start = buf.len();
    put_timestamp(buf, t);
    for byte in &mut buf[start..] {
        *byte = !*byte;
    }
}

pub fn get_timestamp_desc(buf: &mut &[u8]) -> Result<DateTime<Utc>> {
    ensure_remaining(buf, TIMESTAMP_LEN, "timestamp")?;
    let mut raw = [0u8; TIMESTAMP_LEN];
    buf.copy_to_slice(&mut raw);
    for byte in &mut raw {
        *byte = !*byte;
    }
    get_timestamp(&mut &raw[..])
}

// =============================================================================
// Strings
// =============================================================================

/// Append raw bytes with NUL escaped as `00 FF` and a `00 01` terminator.
pub fn put_bytes_terminated(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == STRING_ESCAPE {
            buf.put_u8(STRING_ESCAPE);
            buf.put_u8(STRING_ESCAPED_NUL);
        } else {
            buf.put_u8(b);
        }
    }
    buf.put_u8(STRING_ESCAPE);
    buf.put_u8(STRING_TERMINATOR);
}

pub fn get_bytes_terminated(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        ensure_remaining(buf, 1, "string")?;
        let b = buf.get_u8();
        if b != STRING_ESCAPE {
            out.push(b);
            continue;
        }
        ensure_remaining(buf, 1, "string escape")?;
        match buf.get_u8() {
            STRING_TERMINATOR => return Ok(out),
            STRING_ESCAPED_NUL => out.push(0),
            other => {
                return Err(AegisError::InvalidKey(format!(
                    "invalid string escape 0x00 0x{:02X}",
                    other
                )))
            }
        }
    }
}

pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes_terminated(buf, s.as_bytes());
}

pub fn get_str(buf: &mut &[u8]) -> Result<String> {
    let bytes = get_bytes_terminated(buf)?;
    String::from_utf8(bytes).map_err(|e| AegisError::InvalidKey(format!("invalid utf-8 in key: {}", e)))
}

// =============================================================================
// Floats
// =============================================================================

/// Append `value` so that byte order matches numeric order, with negative
/// values before positive ones.
pub fn put_f32_ordered(buf: &mut Vec<u8>, value: f32) {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_BIT_32 != 0 { !bits } else { bits | SIGN_BIT_32 };
    buf.put_u32(ordered);
}

pub fn get_f32_ordered(buf: &mut &[u8]) -> Result<f32> {
    ensure_remaining(buf, 4, "f32")?;
    let ordered = buf.get_u32();
    let bits = if ordered & SIGN_BIT_32 != 0 { ordered & !SIGN_BIT_32 } else { !ordered };
    Ok(f32::from_bits(bits))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encoded<F: Fn(&mut Vec<u8>)>(f: F) -> Vec<u8> {
        let mut buf = Vec::new();
        f(&mut buf);
        buf
    }

    #[test]
    fn test_varint_order_and_width() {
        let values = [0u64, 1, 127, 255, 256, 65_535, 1 << 40, u64::MAX];
        for pair in values.windows(2) {
            let a = encoded(|b| put_varint(b, pair[0]));
            let b = encoded(|b| put_varint(b, pair[1]));
            assert!(a < b, "{} should sort before {}", pair[0], pair[1]);
        }
        assert_eq!(encoded(|b| put_varint(b, 0)), vec![0]);
        assert_eq!(varint_len(300), 3);

        let bytes = encoded(|b| put_varint(b, 1 << 40));
        assert_eq!(get_varint(&mut &bytes[..]).expect("decode"), 1 << 40);
    }

    #[test]
    fn test_timestamp_order() {
        let times = [
            DateTime::<Utc>::MIN_UTC,
            Utc.timestamp_opt(-1, 500).unwrap(),
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(0, 1).unwrap(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            DateTime::<Utc>::MAX_UTC,
        ];
        for pair in times.windows(2) {
            let a = encoded(|b| put_timestamp(b, &pair[0]));
            let b = encoded(|b| put_timestamp(b, &pair[1]));
            assert!(a < b);

            let a = encoded(|b| put_timestamp_desc(b, &pair[0]));
            let b = encoded(|b| put_timestamp_desc(b, &pair[1]));
            assert!(a > b);
        }
        for t in &times {
            let bytes = encoded(|b| put_timestamp_desc(b, t));
            assert_eq!(get_timestamp_desc(&mut &bytes[..]).expect("decode"), *t);
        }
    }

    #[test]
    fn test_string_lexicographic() {
        let strings = ["", "\0", "a", "a\0", "a\0b", "ab", "b"];
        for pair in strings.windows(2) {
            let a = encoded(|b| put_str(b, pair[0]));
            let b = encoded(|b| put_str(b, pair[1]));
            assert!(a < b, "{:?} should sort before {:?}", pair[0], pair[1]);
        }

        let mut buf = encoded(|b| put_str(b, "x\0y"));
        buf.push(0x42);
        let mut input = &buf[..];
        assert_eq!(get_str(&mut input).expect("decode"), "x\0y");
        assert_eq!(input, &[0x42]);
    }

    #[test]
    fn test_bad_string_escape() {
        let bytes = [b'a', 0x00, 0x07];
        assert!(matches!(get_str(&mut &bytes[..]), Err(AegisError::InvalidKey(_))));
    }

    #[test]
    fn test_float_order() {
        let values = [f32::NEG_INFINITY, -10.5, -0.0, 0.0, 1e-30, 3.25, f32::INFINITY];
        for pair in values.windows(2) {
            let a = encoded(|b| put_f32_ordered(b, pair[0]));
            let b = encoded(|b| put_f32_ordered(b, pair[1]));
            assert!(a < b);
        }
        let bytes = encoded(|b| put_f32_ordered(b, -2.5));
        assert_eq!(get_f32_ordered(&mut &bytes[..]).expect("decode"), -2.5);
    }

    #[test]
    fn test_truncated_input() {
        assert!(get_timestamp(&mut &[0u8; 5][..]).is_err());
        assert!(get_varint(&mut &[3u8, 1][..]).is_err());
    }
}
