//! Value Model
//!
//! This module defines the dynamic value tree stored under each key.
//! A `Value` is any combination of primitives, byte strings, ordered
//! sequences, and string-keyed mappings — exactly the set of shapes the
//! MessagePack wire format can carry.
//!
//! ## JSON bridging
//!
//! Two conversions sit next to the model because three different surfaces
//! need them: the change-log line format, the `set --json` command, and the
//! JSON response envelope. JSON cannot express byte strings, so `Bytes`
//! values cross that bridge as arrays of numbers.

use bytes::Bytes;
use std::fmt;

/// A dynamic value stored in the database.
///
/// # Example
///
/// ```
/// use snowkv::codec::Value;
///
/// let v = Value::Map(vec![
///     ("name".to_string(), Value::from("snow")),
///     ("count".to_string(), Value::Int(3)),
/// ]);
/// assert_eq!(v.type_name(), "map");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absent value.
    Nil,

    /// A boolean.
    Bool(bool),

    /// A signed integer. Non-negative integers that fit in `i64` always
    /// decode into this variant so equality is stable across round trips.
    Int(i64),

    /// An unsigned integer above `i64::MAX`.
    UInt(u64),

    /// A double-precision float.
    Float(f64),

    /// A UTF-8 string.
    Str(String),

    /// A raw byte string.
    Bytes(Bytes),

    /// An ordered sequence of values.
    Seq(Vec<Value>),

    /// A string-keyed mapping. Insertion order is preserved.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Returns a short name for the value's type, used in shell output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
        }
    }

    /// Returns true if this value is `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Looks up a key in a `Map` value.
    ///
    /// Returns `None` for non-map values and missing keys. A duplicated key
    /// resolves to its last occurrence, matching last-write-wins semantics
    /// elsewhere in the store.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Converts this value into a `serde_json::Value`.
    ///
    /// Byte strings become arrays of numbers; everything else maps onto its
    /// natural JSON counterpart. Non-finite floats become JSON null because
    /// JSON has no spelling for them.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::UInt(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|byte| serde_json::Value::from(*byte)).collect())
            }
            Value::Seq(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    /// Builds a value from a `serde_json::Value`.
    ///
    /// Integer-shaped numbers become `Int` (or `UInt` above `i64::MAX`),
    /// everything else numeric becomes `Float`.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Seq(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    /// Human-oriented rendering used by the echo-mode shell.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::UInt(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Seq(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Int(-1).type_name(), "int");
        assert_eq!(Value::UInt(u64::MAX).type_name(), "int");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(Value::Seq(vec![]).type_name(), "seq");
    }

    #[test]
    fn test_map_get_last_write_wins() {
        let v = Value::Map(vec![
            ("a".to_string(), Value::Int(1)),
            ("a".to_string(), Value::Int(2)),
        ]);
        assert_eq!(v.get("a"), Some(&Value::Int(2)));
        assert_eq!(v.get("b"), None);
        assert_eq!(Value::Int(1).get("a"), None);
    }

    #[test]
    fn test_json_round_trip() {
        let v = Value::Map(vec![
            ("n".to_string(), Value::Nil),
            ("b".to_string(), Value::Bool(true)),
            ("i".to_string(), Value::Int(-42)),
            ("u".to_string(), Value::UInt(u64::MAX)),
            ("f".to_string(), Value::Float(1.5)),
            ("s".to_string(), Value::from("hello")),
            (
                "seq".to_string(),
                Value::Seq(vec![Value::Int(1), Value::Int(2)]),
            ),
        ]);
        assert_eq!(Value::from_json(&v.to_json()), v);
    }

    #[test]
    fn test_json_bytes_become_number_array() {
        let v = Value::Bytes(Bytes::from_static(&[1, 2, 3]));
        let json = v.to_json();
        assert_eq!(json, serde_json::json!([1, 2, 3]));
        // The bridge is lossy on purpose: bytes come back as a sequence.
        assert_eq!(
            Value::from_json(&json),
            Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Seq(vec![Value::Int(1)]).to_string(), "[1]");
        assert_eq!(Value::Bytes(Bytes::from_static(b"xy")).to_string(), "<2 bytes>");
    }
}
