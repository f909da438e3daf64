//! Aegis Codec - Key and Value Codecs
//!
//! Traits that turn typed keys and values into the byte strings stored in
//! sorted maps. Keys use the order-preserving primitives from `encoding`
//! so that byte order equals logical order. Values are opaque to the
//! engine and go through an injected codec, bincode by default.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::encoding;
use aegis_common::{AegisError, BigId, Result, MAX_LOCAL_ID};
use serde::de::DeserializeOwned;
use serde::Serialize;

// =============================================================================
// Key Codec
// =============================================================================

/// A key type that can be stored in a sorted map.
///
/// Implementations must be self-delimiting and order-preserving: for any
/// two keys `a < b`, `a.to_key_bytes() < b.to_key_bytes()` byte-wise.
pub trait MapKey: Sized + Clone + Send + Sync + 'static {
    fn encode_key(&self, buf: &mut Vec<u8>);

    fn decode_key(buf: &mut &[u8]) -> Result<Self>;

    fn to_key_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        self.encode_key(&mut buf);
        buf
    }

    /// Decode a complete key, rejecting trailing bytes.
    fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let key = Self::decode_key(&mut input)?;
        if !input.is_empty() {
            return Err(AegisError::InvalidKey(format!(
                "{} trailing bytes after key",
                input.len()
            )));
        }
        Ok(key)
    }
}

impl MapKey for u64 {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        encoding::put_varint(buf, *self);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        encoding::get_varint(buf)
    }
}

impl MapKey for String {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        encoding::put_str(buf, self);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        encoding::get_str(buf)
    }
}

impl MapKey for Vec<u8> {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        encoding::put_bytes_terminated(buf, self);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        encoding::get_bytes_terminated(buf)
    }
}

/// Scope then local id, both as varints, so ids of one scope stay
/// contiguous and sort numerically.
impl MapKey for BigId {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        encoding::put_varint(buf, self.scope as u64);
        encoding::put_varint(buf, self.id);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        let scope = encoding::get_varint(buf)?;
        let scope = u32::try_from(scope)
            .map_err(|_| AegisError::InvalidKey(format!("id scope {} out of range", scope)))?;
        let id = encoding::get_varint(buf)?;
        if id > MAX_LOCAL_ID {
            return Err(AegisError::InvalidKey(format!("local id {} exceeds 63 bits", id)));
        }
        Ok(BigId::new(scope, id))
    }
}

impl<A: MapKey, B: MapKey> MapKey for (A, B) {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        self.0.encode_key(buf);
        self.1.encode_key(buf);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        let a = A::decode_key(buf)?;
        let b = B::decode_key(buf)?;
        Ok((a, b))
    }
}

// =============================================================================
// Value Codec
// =============================================================================

/// Injected capability that encodes opaque payload values.
pub trait ValueCodec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<V>;
}

/// Default codec for any serde payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for BincodeCodec {
    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_key_orders_by_first_component() {
        let a = ("alpha".to_string(), 900u64).to_key_bytes();
        let b = ("beta".to_string(), 1u64).to_key_bytes();
        assert!(a < b);

        let decoded = <(String, u64)>::from_key_bytes(&b).expect("decode");
        assert_eq!(decoded, ("beta".to_string(), 1));
    }

    #[test]
    fn test_big_id_orders_by_scope_then_id() {
        let ids = [BigId::new(1, 0), BigId::new(1, 300), BigId::new(1, 1 << 40), BigId::new(2, 1)];
        for pair in ids.windows(2) {
            assert!(pair[0].to_key_bytes() < pair[1].to_key_bytes());
        }
        let bytes = BigId::new(9, 77).to_key_bytes();
        assert_eq!(BigId::from_key_bytes(&bytes).expect("decode"), BigId::new(9, 77));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = 5u64.to_key_bytes();
        bytes.push(0);
        assert!(matches!(u64::from_key_bytes(&bytes), Err(AegisError::InvalidKey(_))));
    }

    #[test]
    fn test_bincode_codec() {
        let codec = BincodeCodec;
        let bytes = ValueCodec::<Vec<String>>::encode(&codec, &vec!["temp".to_string()]).expect("encode");
        let value: Vec<String> = codec.decode(&bytes).expect("decode");
        assert_eq!(value, vec!["temp".to_string()]);
    }
}
