//! MessagePack Encoder
//!
//! Serializes a [`Value`] tree into its MessagePack wire form. The encoder
//! always picks the smallest representation for integers and length-prefixed
//! types, which is what other MessagePack implementations expect to read.

use crate::codec::value::Value;

/// Encodes a value into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

/// Returns the encoded byte length of a value without keeping the bytes.
///
/// Used by the cap checks before a mutation is accepted.
pub fn encoded_len(value: &Value) -> usize {
    encode(value).len()
}

/// Encodes a value into an existing buffer.
pub fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Nil => buf.push(0xc0),
        Value::Bool(false) => buf.push(0xc2),
        Value::Bool(true) => buf.push(0xc3),
        Value::Int(n) => encode_int(*n, buf),
        Value::UInt(n) => encode_uint(*n, buf),
        Value::Float(x) => {
            buf.push(0xcb);
            buf.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        Value::Str(s) => {
            encode_str_header(s.len(), buf);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            encode_bin_header(b.len(), buf);
            buf.extend_from_slice(b);
        }
        Value::Seq(items) => {
            encode_seq_header(items.len(), buf);
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(entries) => {
            encode_map_header(entries.len(), buf);
            for (key, val) in entries {
                encode_str_header(key.len(), buf);
                buf.extend_from_slice(key.as_bytes());
                encode_into(val, buf);
            }
        }
    }
}

/// Non-negative signed integers share the unsigned representations so that
/// `Int(5)` and `UInt(5)` are byte-identical on the wire.
fn encode_int(n: i64, buf: &mut Vec<u8>) {
    if n >= 0 {
        encode_uint(n as u64, buf);
    } else if n >= -32 {
        buf.push(n as u8); // negative fixint
    } else if n >= i64::from(i8::MIN) {
        buf.push(0xd0);
        buf.push(n as i8 as u8);
    } else if n >= i64::from(i16::MIN) {
        buf.push(0xd1);
        buf.extend_from_slice(&(n as i16).to_be_bytes());
    } else if n >= i64::from(i32::MIN) {
        buf.push(0xd2);
        buf.extend_from_slice(&(n as i32).to_be_bytes());
    } else {
        buf.push(0xd3);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_uint(n: u64, buf: &mut Vec<u8>) {
    if n <= 0x7f {
        buf.push(n as u8); // positive fixint
    } else if n <= u64::from(u8::MAX) {
        buf.push(0xcc);
        buf.push(n as u8);
    } else if n <= u64::from(u16::MAX) {
        buf.push(0xcd);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u64::from(u32::MAX) {
        buf.push(0xce);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(0xcf);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_str_header(len: usize, buf: &mut Vec<u8>) {
    if len < 32 {
        buf.push(0xa0 | len as u8); // fixstr
    } else if len <= u8::MAX as usize {
        buf.push(0xd9);
        buf.push(len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(0xda);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xdb);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn encode_bin_header(len: usize, buf: &mut Vec<u8>) {
    if len <= u8::MAX as usize {
        buf.push(0xc4);
        buf.push(len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(0xc5);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xc6);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn encode_seq_header(len: usize, buf: &mut Vec<u8>) {
    if len < 16 {
        buf.push(0x90 | len as u8); // fixarray
    } else if len <= u16::MAX as usize {
        buf.push(0xdc);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xdd);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn encode_map_header(len: usize, buf: &mut Vec<u8>) {
    if len < 16 {
        buf.push(0x80 | len as u8); // fixmap
    } else if len <= u16::MAX as usize {
        buf.push(0xde);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xdf);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_scalars() {
        assert_eq!(encode(&Value::Nil), vec![0xc0]);
        assert_eq!(encode(&Value::Bool(false)), vec![0xc2]);
        assert_eq!(encode(&Value::Bool(true)), vec![0xc3]);
    }

    #[test]
    fn test_integers_pick_smallest_form() {
        assert_eq!(encode(&Value::Int(0)), vec![0x00]);
        assert_eq!(encode(&Value::Int(127)), vec![0x7f]);
        assert_eq!(encode(&Value::Int(128)), vec![0xcc, 0x80]);
        assert_eq!(encode(&Value::Int(-1)), vec![0xff]);
        assert_eq!(encode(&Value::Int(-32)), vec![0xe0]);
        assert_eq!(encode(&Value::Int(-33)), vec![0xd0, 0xdf]);
        assert_eq!(encode(&Value::Int(65535)), vec![0xcd, 0xff, 0xff]);
        assert_eq!(
            encode(&Value::UInt(u64::MAX)),
            vec![0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_int_and_uint_agree_on_the_wire() {
        assert_eq!(encode(&Value::Int(300)), encode(&Value::UInt(300)));
    }

    #[test]
    fn test_float() {
        let bytes = encode(&Value::Float(1.0));
        assert_eq!(bytes[0], 0xcb);
        assert_eq!(bytes.len(), 9);
    }

    #[test]
    fn test_str_headers() {
        assert_eq!(encode(&Value::from("a")), vec![0xa1, b'a']);
        let long = "x".repeat(32);
        let bytes = encode(&Value::from(long.as_str()));
        assert_eq!(&bytes[..2], &[0xd9, 32]);
    }

    #[test]
    fn test_bin_header() {
        let bytes = encode(&Value::Bytes(Bytes::from_static(&[9, 9])));
        assert_eq!(bytes, vec![0xc4, 2, 9, 9]);
    }

    #[test]
    fn test_containers() {
        let seq = Value::Seq(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(encode(&seq), vec![0x92, 0x01, 0x02]);

        let map = Value::Map(vec![("a".to_string(), Value::Int(1))]);
        assert_eq!(encode(&map), vec![0x81, 0xa1, b'a', 0x01]);
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        let v = Value::Map(vec![(
            "key".to_string(),
            Value::Seq(vec![Value::from("hello"), Value::Float(2.5)]),
        )]);
        assert_eq!(encoded_len(&v), encode(&v).len());
    }
}
