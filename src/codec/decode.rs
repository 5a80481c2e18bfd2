//! MessagePack Decoder
//!
//! Parses a complete MessagePack document back into a [`Value`] tree.
//!
//! ## How the Decoder Works
//!
//! The decoder walks a byte slice with an explicit cursor and fails fast:
//! truncated input, reserved type tags, invalid UTF-8 inside `str` payloads,
//! non-string map keys, excessive nesting, and trailing bytes after the root
//! value are all distinct errors. Unlike the incremental socket parsers in
//! this codebase, shard records carry an exact length up front, so there is
//! no "need more data" state — short input is simply corrupt.

use crate::codec::value::Value;
use bytes::Bytes;
use thiserror::Error;

/// Maximum container nesting depth (prevents stack overflow on crafted input).
pub const MAX_NESTING_DEPTH: usize = 64;

/// Errors that can occur while decoding a MessagePack document.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// The input ended before the value was complete.
    #[error("truncated input: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// A reserved or unsupported type tag was encountered.
    #[error("unsupported type tag {tag:#04x} at offset {offset}")]
    UnsupportedTag { tag: u8, offset: usize },

    /// A `str` payload was not valid UTF-8.
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// A map key was not a string.
    #[error("map key at offset {offset} is not a string")]
    NonStringKey { offset: usize },

    /// Containers nested deeper than [`MAX_NESTING_DEPTH`].
    #[error("maximum nesting depth exceeded: {MAX_NESTING_DEPTH}")]
    TooDeep,

    /// Bytes remained after the root value.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes { remaining: usize },
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decodes a complete MessagePack document.
///
/// The entire input must be consumed by the root value; a record that
/// carries extra bytes is corrupt.
pub fn decode(buf: &[u8]) -> DecodeResult<Value> {
    let mut cursor = Cursor { buf, pos: 0 };
    let value = cursor.read_value(0)?;
    if cursor.pos != buf.len() {
        return Err(DecodeError::TrailingBytes {
            remaining: buf.len() - cursor.pos,
        });
    }
    Ok(value)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: n - (self.buf.len() - self.pos),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_byte(&mut self) -> DecodeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> DecodeResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> DecodeResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> DecodeResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn read_value(&mut self, depth: usize) -> DecodeResult<Value> {
        if depth > MAX_NESTING_DEPTH {
            return Err(DecodeError::TooDeep);
        }

        let tag_offset = self.pos;
        let tag = self.take_byte()?;

        let value = match tag {
            // fixint families
            0x00..=0x7f => Value::Int(i64::from(tag)),
            0xe0..=0xff => Value::Int(i64::from(tag as i8)),

            // fixstr / fixarray / fixmap
            0xa0..=0xbf => self.read_str((tag & 0x1f) as usize)?,
            0x90..=0x9f => self.read_seq((tag & 0x0f) as usize, depth)?,
            0x80..=0x8f => self.read_map((tag & 0x0f) as usize, depth)?,

            0xc0 => Value::Nil,
            0xc2 => Value::Bool(false),
            0xc3 => Value::Bool(true),

            // bin family
            0xc4 => {
                let len = self.take_byte()? as usize;
                self.read_bytes(len)?
            }
            0xc5 => {
                let len = self.take_u16()? as usize;
                self.read_bytes(len)?
            }
            0xc6 => {
                let len = self.take_u32()? as usize;
                self.read_bytes(len)?
            }

            // floats
            0xca => {
                let bits = self.take_u32()?;
                Value::Float(f64::from(f32::from_bits(bits)))
            }
            0xcb => {
                let bits = self.take_u64()?;
                Value::Float(f64::from_bits(bits))
            }

            // uint family — folded into Int when it fits, for stable equality
            0xcc => Value::Int(i64::from(self.take_byte()?)),
            0xcd => Value::Int(i64::from(self.take_u16()?)),
            0xce => Value::Int(i64::from(self.take_u32()?)),
            0xcf => {
                let n = self.take_u64()?;
                match i64::try_from(n) {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::UInt(n),
                }
            }

            // int family
            0xd0 => Value::Int(i64::from(self.take_byte()? as i8)),
            0xd1 => Value::Int(i64::from(self.take_u16()? as i16)),
            0xd2 => Value::Int(i64::from(self.take_u32()? as i32)),
            0xd3 => Value::Int(self.take_u64()? as i64),

            // str family
            0xd9 => {
                let len = self.take_byte()? as usize;
                self.read_str(len)?
            }
            0xda => {
                let len = self.take_u16()? as usize;
                self.read_str(len)?
            }
            0xdb => {
                let len = self.take_u32()? as usize;
                self.read_str(len)?
            }

            // array / map 16- and 32-bit forms
            0xdc => {
                let len = self.take_u16()? as usize;
                self.read_seq(len, depth)?
            }
            0xdd => {
                let len = self.take_u32()? as usize;
                self.read_seq(len, depth)?
            }
            0xde => {
                let len = self.take_u16()? as usize;
                self.read_map(len, depth)?
            }
            0xdf => {
                let len = self.take_u32()? as usize;
                self.read_map(len, depth)?
            }

            // 0xc1 (never used), ext family (unsupported by this store)
            other => {
                return Err(DecodeError::UnsupportedTag {
                    tag: other,
                    offset: tag_offset,
                })
            }
        };

        Ok(value)
    }

    fn read_str(&mut self, len: usize) -> DecodeResult<Value> {
        let offset = self.pos;
        let raw = self.take(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8 { offset })?;
        Ok(Value::Str(s.to_string()))
    }

    fn read_bytes(&mut self, len: usize) -> DecodeResult<Value> {
        let raw = self.take(len)?;
        Ok(Value::Bytes(Bytes::copy_from_slice(raw)))
    }

    fn read_seq(&mut self, len: usize, depth: usize) -> DecodeResult<Value> {
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.read_value(depth + 1)?);
        }
        Ok(Value::Seq(items))
    }

    fn read_map(&mut self, len: usize, depth: usize) -> DecodeResult<Value> {
        let mut entries = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let key_offset = self.pos;
            let key = match self.read_value(depth + 1)? {
                Value::Str(s) => s,
                _ => return Err(DecodeError::NonStringKey { offset: key_offset }),
            };
            let val = self.read_value(depth + 1)?;
            entries.push((key, val));
        }
        Ok(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode::encode;

    fn round_trip(v: Value) {
        assert_eq!(decode(&encode(&v)).unwrap(), v);
    }

    #[test]
    fn test_round_trip_scalars() {
        round_trip(Value::Nil);
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::Int(0));
        round_trip(Value::Int(-1));
        round_trip(Value::Int(i64::MIN));
        round_trip(Value::Int(i64::MAX));
        round_trip(Value::UInt(u64::MAX));
        round_trip(Value::Float(-2.75));
        round_trip(Value::from("hello"));
        round_trip(Value::from("x".repeat(300).as_str()));
        round_trip(Value::Bytes(Bytes::from_static(&[0, 1, 255])));
    }

    #[test]
    fn test_round_trip_containers() {
        round_trip(Value::Seq(vec![
            Value::Nil,
            Value::Int(7),
            Value::Seq(vec![Value::from("nested")]),
        ]));
        round_trip(Value::Map(vec![
            ("a".to_string(), Value::Int(1)),
            (
                "b".to_string(),
                Value::Map(vec![("c".to_string(), Value::Bool(false))]),
            ),
        ]));
        round_trip(Value::Seq((0..40).map(Value::Int).collect()));
    }

    #[test]
    fn test_positive_uint_decodes_as_int() {
        // 0xcc 0x05 is uint8 5; it must compare equal to Int(5).
        assert_eq!(decode(&[0xcc, 0x05]).unwrap(), Value::Int(5));
        // Only values above i64::MAX keep the UInt variant.
        assert_eq!(
            decode(&encode(&Value::UInt(u64::MAX))).unwrap(),
            Value::UInt(u64::MAX)
        );
    }

    #[test]
    fn test_float32_widens() {
        assert_eq!(decode(&[0xca, 0x3f, 0x80, 0x00, 0x00]).unwrap(), Value::Float(1.0));
    }

    #[test]
    fn test_truncated() {
        let bytes = encode(&Value::from("hello"));
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));

        assert!(matches!(decode(&[]).unwrap_err(), DecodeError::Truncated { .. }));
        // Array header promising more elements than the input holds.
        assert!(matches!(decode(&[0x92, 0x01]).unwrap_err(), DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Value::Int(1));
        bytes.push(0x00);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::TrailingBytes { remaining: 1 });
    }

    #[test]
    fn test_reserved_and_ext_tags_rejected() {
        assert!(matches!(
            decode(&[0xc1]).unwrap_err(),
            DecodeError::UnsupportedTag { tag: 0xc1, .. }
        ));
        // fixext1
        assert!(matches!(
            decode(&[0xd4, 0x00, 0x00]).unwrap_err(),
            DecodeError::UnsupportedTag { tag: 0xd4, .. }
        ));
    }

    #[test]
    fn test_non_string_map_key_rejected() {
        // fixmap{1} with integer key 1 and value 2
        assert!(matches!(
            decode(&[0x81, 0x01, 0x02]).unwrap_err(),
            DecodeError::NonStringKey { .. }
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        // fixstr{1} with a lone continuation byte
        assert!(matches!(
            decode(&[0xa1, 0x80]).unwrap_err(),
            DecodeError::InvalidUtf8 { .. }
        ));
    }

    #[test]
    fn test_depth_limit() {
        // 70 nested single-element arrays around a nil.
        let mut bytes = vec![0x91; 70];
        bytes.push(0xc0);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::TooDeep);
    }
}
