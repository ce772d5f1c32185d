//! # Typed Scalar Payload Codec
//!
//! Encoding of the typed values the store accepts into the opaque byte
//! payloads the engine persists, and back. The engine itself never inspects
//! a payload; this codec is the contract between the typed accessor surface
//! and the bytes on disk.
//!
//! ## Payload Formats
//!
//! | Type        | Payload                                        |
//! |-------------|------------------------------------------------|
//! | bool        | varint 0 or 1 (one byte)                       |
//! | i32         | varint of the two's-complement u32 (1-5 bytes) |
//! | i64         | varint of the two's-complement u64 (1-10 bytes)|
//! | f32         | 4 bytes little-endian                          |
//! | f64         | 8 bytes little-endian                          |
//! | bytes       | varint(len) then the bytes                     |
//! | string      | varint(len) then UTF-8 bytes                   |
//! | string list | repeated varint(len) + UTF-8 bytes             |
//!
//! Length-delimited payloads carry their own inner prefix so a stored value
//! is self-describing; `inner_payload_len` recovers the inner length for
//! size queries without fully decoding.

use eyre::{ensure, Result};

use super::varint::{decode_varint, encode_varint, varint_len, MAX_VARINT_LEN};

pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

pub fn encode_i32(value: i32) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_varint(u64::from(value as u32), &mut buf);
    buf[..len].to_vec()
}

pub fn encode_i64(value: i64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_varint(value as u64, &mut buf);
    buf[..len].to_vec()
}

pub fn encode_f32(value: f32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn encode_f64(value: f64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn encode_bytes(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint_len(value.len() as u64) + value.len());
    let mut prefix = [0u8; MAX_VARINT_LEN];
    let len = encode_varint(value.len() as u64, &mut prefix);
    out.extend_from_slice(&prefix[..len]);
    out.extend_from_slice(value);
    out
}

pub fn encode_string(value: &str) -> Vec<u8> {
    encode_bytes(value.as_bytes())
}

pub fn encode_string_list(values: &[String]) -> Vec<u8> {
    let total: usize = values
        .iter()
        .map(|v| varint_len(v.len() as u64) + v.len())
        .sum();
    let mut out = Vec::with_capacity(total);
    for value in values {
        out.extend_from_slice(&encode_string(value));
    }
    out
}

pub fn decode_bool(buf: &[u8]) -> Result<bool> {
    let (value, _) = decode_varint(buf)?;
    Ok(value != 0)
}

pub fn decode_i32(buf: &[u8]) -> Result<i32> {
    let (value, _) = decode_varint(buf)?;
    Ok(value as u32 as i32)
}

pub fn decode_i64(buf: &[u8]) -> Result<i64> {
    let (value, _) = decode_varint(buf)?;
    Ok(value as i64)
}

pub fn decode_f32(buf: &[u8]) -> Result<f32> {
    ensure!(buf.len() >= 4, "f32 payload too short: {}", buf.len());
    Ok(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

pub fn decode_f64(buf: &[u8]) -> Result<f64> {
    ensure!(buf.len() >= 8, "f64 payload too short: {}", buf.len());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    Ok(f64::from_le_bytes(bytes))
}

pub fn decode_bytes(buf: &[u8]) -> Result<Vec<u8>> {
    let (len, prefix) = decode_varint(buf)?;
    let len = len as usize;
    ensure!(
        prefix + len <= buf.len(),
        "length-delimited payload truncated: {} + {} > {}",
        prefix,
        len,
        buf.len()
    );
    Ok(buf[prefix..prefix + len].to_vec())
}

pub fn decode_string(buf: &[u8]) -> Result<String> {
    let bytes = decode_bytes(buf)?;
    String::from_utf8(bytes).map_err(|e| eyre::eyre!("string payload is not UTF-8: {}", e))
}

pub fn decode_string_list(buf: &[u8]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (len, prefix) = decode_varint(&buf[pos..])?;
        let len = len as usize;
        ensure!(
            pos + prefix + len <= buf.len(),
            "string list payload truncated at offset {}",
            pos
        );
        let bytes = &buf[pos + prefix..pos + prefix + len];
        out.push(
            std::str::from_utf8(bytes)
                .map_err(|e| eyre::eyre!("string list element is not UTF-8: {}", e))?
                .to_string(),
        );
        pos += prefix + len;
    }
    Ok(out)
}

/// Length of the inner payload when the value carries a coherent inner
/// length prefix (bytes, string), `None` otherwise.
pub fn inner_payload_len(buf: &[u8]) -> Option<usize> {
    let (len, prefix) = decode_varint(buf).ok()?;
    let len = len as usize;
    (prefix + len == buf.len()).then_some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_roundtrip() {
        assert!(decode_bool(&encode_bool(true)).unwrap());
        assert!(!decode_bool(&encode_bool(false)).unwrap());
        assert_eq!(encode_bool(true).len(), 1);
    }

    #[test]
    fn i32_roundtrip() {
        for value in [0, 1, -1, 127, 128, i32::MAX, i32::MIN, -42] {
            assert_eq!(decode_i32(&encode_i32(value)).unwrap(), value);
        }
    }

    #[test]
    fn negative_i32_encodes_in_five_bytes() {
        assert_eq!(encode_i32(-1).len(), 5);
        assert_eq!(encode_i32(i32::MIN).len(), 5);
    }

    #[test]
    fn i64_roundtrip() {
        for value in [0, 1, -1, i64::MAX, i64::MIN, 1 << 40] {
            assert_eq!(decode_i64(&encode_i64(value)).unwrap(), value);
        }
    }

    #[test]
    fn float_roundtrip() {
        assert_eq!(decode_f32(&encode_f32(3.5)).unwrap(), 3.5);
        assert_eq!(decode_f64(&encode_f64(-0.125)).unwrap(), -0.125);
        assert_eq!(encode_f32(0.0).len(), 4);
        assert_eq!(encode_f64(0.0).len(), 8);
    }

    #[test]
    fn bytes_roundtrip() {
        let payload = encode_bytes(b"hello");
        assert_eq!(payload[0], 5);
        assert_eq!(decode_bytes(&payload).unwrap(), b"hello");

        assert_eq!(decode_bytes(&encode_bytes(b"")).unwrap(), b"");
    }

    #[test]
    fn string_roundtrip() {
        let payload = encode_string("héllo");
        assert_eq!(decode_string(&payload).unwrap(), "héllo");
    }

    #[test]
    fn string_list_roundtrip() {
        let list = vec!["a".to_string(), "".to_string(), "longer entry".to_string()];
        let payload = encode_string_list(&list);
        assert_eq!(decode_string_list(&payload).unwrap(), list);

        assert!(decode_string_list(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_bytes_fails() {
        let mut payload = encode_bytes(b"hello");
        payload.truncate(3);
        assert!(decode_bytes(&payload).is_err());
    }

    #[test]
    fn inner_payload_len_detects_prefix() {
        assert_eq!(inner_payload_len(&encode_string("hello")), Some(5));
        assert_eq!(inner_payload_len(&encode_bytes(b"")), Some(0));
        // A varint scalar is not a coherent length-delimited payload.
        assert_eq!(inner_payload_len(&encode_i32(7)), None);
    }
}
