//! Change-Log Line Format
//!
//! One logical change per line, UTF-8 text:
//!
//! ```text
//! ; comment lines start with a semicolon
//! counter<7
//! user_a<user_b<{"role":"admin"}
//! #stale_key #other_key
//! ```
//!
//! - A *set* line is `key1<key2<…<value`: every listed key takes the same
//!   value. Keys are sanitized identifiers and can never contain `<`.
//! - A *remove* line lists `#`-prefixed keys.
//! - Values are stringified as `N` (nil), `T`/`F` (booleans), bare decimal
//!   for numbers, and JSON for strings, sequences, and mappings.
//!
//! Blank lines and `;` comments are ignored on replay, as is a final line
//! that does not end in a newline (a flush interrupted mid-write).

use crate::codec::value::Value;
use thiserror::Error;

/// Errors raised while parsing a change-log document.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LineError {
    #[error("line {line}: empty key list")]
    EmptyKeys { line: usize },

    #[error("line {line}: unparsable value {text:?}")]
    BadValue { line: usize, text: String },

    #[error("line {line}: remove token {token:?} is missing its '#' prefix")]
    BadRemoveToken { line: usize, token: String },
}

/// One parsed change-log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogLine {
    /// All listed keys take the given value.
    Set { keys: Vec<String>, value: Value },

    /// All listed keys are deleted.
    Remove { keys: Vec<String> },
}

/// Stringifies a value into its line form.
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::Nil => "N".to_string(),
        Value::Bool(true) => "T".to_string(),
        Value::Bool(false) => "F".to_string(),
        Value::Int(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        // {:?} keeps the decimal point so floats survive the round trip.
        Value::Float(x) => format!("{:?}", x),
        Value::Str(_) | Value::Bytes(_) | Value::Seq(_) | Value::Map(_) => {
            value.to_json().to_string()
        }
    }
}

/// Parses the value portion of a set line.
pub fn parse_value(text: &str) -> Option<Value> {
    match text {
        "N" => return Some(Value::Nil),
        "T" => return Some(Value::Bool(true)),
        "F" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::Int(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Value::UInt(n));
    }
    // Only digit-shaped input may become a float; serde_json would accept
    // the same text anyway, this just skips the allocation.
    if text.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        if let Ok(x) = text.parse::<f64>() {
            return Some(Value::Float(x));
        }
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .map(|json| Value::from_json(&json))
}

/// Formats a set line for the given keys and value.
pub fn format_set(keys: &[String], value: &Value) -> String {
    let mut line = keys.join("<");
    line.push('<');
    line.push_str(&stringify_value(value));
    line
}

/// Formats a remove line for the given keys.
pub fn format_remove(keys: &[String]) -> String {
    keys.iter()
        .map(|k| format!("#{}", k))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_key_shaped(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Parses a single non-comment line.
fn parse_line(text: &str, line_no: usize) -> Result<LogLine, LineError> {
    if text.starts_with('#') {
        let mut keys = Vec::new();
        for token in text.split_whitespace() {
            let key = token
                .strip_prefix('#')
                .ok_or_else(|| LineError::BadRemoveToken {
                    line: line_no,
                    token: token.to_string(),
                })?;
            if !key.is_empty() {
                keys.push(key.to_string());
            }
        }
        if keys.is_empty() {
            return Err(LineError::EmptyKeys { line: line_no });
        }
        return Ok(LogLine::Remove { keys });
    }

    // Keys are the longest leading run of key-shaped segments; whatever
    // remains (which may itself contain '<') is the value text.
    let segments: Vec<&str> = text.split('<').collect();
    let mut key_count = 0;
    while key_count < segments.len().saturating_sub(1) && is_key_shaped(segments[key_count]) {
        key_count += 1;
    }
    if key_count == 0 {
        return Err(LineError::EmptyKeys { line: line_no });
    }

    let keys: Vec<String> = segments[..key_count].iter().map(|s| s.to_string()).collect();
    let value_text = segments[key_count..].join("<");
    let value = parse_value(&value_text).ok_or_else(|| LineError::BadValue {
        line: line_no,
        text: value_text.clone(),
    })?;

    Ok(LogLine::Set { keys, value })
}

/// Parses a whole change-log document into ordered lines.
///
/// A trailing line without a terminating newline is dropped — it is the
/// torn remainder of an interrupted flush.
pub fn parse_document(content: &str) -> Result<Vec<LogLine>, LineError> {
    let complete = match content.rfind('\n') {
        Some(idx) => &content[..idx],
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    for (idx, raw) in complete.split('\n').enumerate() {
        let text = raw.trim_end_matches('\r');
        if text.trim().is_empty() || text.starts_with(';') {
            continue;
        }
        out.push(parse_line(text, idx + 1)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn set_round_trip(value: Value) {
        let line = format!("{}\n", format_set(&["k".to_string()], &value));
        let parsed = parse_document(&line).unwrap();
        assert_eq!(
            parsed,
            vec![LogLine::Set {
                keys: vec!["k".to_string()],
                value
            }]
        );
    }

    #[test]
    fn test_round_trip_each_value_type() {
        set_round_trip(Value::Nil);
        set_round_trip(Value::Bool(true));
        set_round_trip(Value::Bool(false));
        set_round_trip(Value::Int(-42));
        set_round_trip(Value::UInt(u64::MAX));
        set_round_trip(Value::Float(2.5));
        set_round_trip(Value::Float(1.0));
        set_round_trip(Value::from("hello world"));
        set_round_trip(Value::Seq(vec![Value::Int(1), Value::from("two")]));
        set_round_trip(Value::Map(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Bool(false)),
        ]));
    }

    #[test]
    fn test_bytes_replay_as_sequence() {
        // The text format has no binary spelling; bytes come back as ints.
        let line = format!(
            "{}\n",
            format_set(&["k".to_string()], &Value::Bytes(Bytes::from_static(&[7, 8])))
        );
        let parsed = parse_document(&line).unwrap();
        assert_eq!(
            parsed,
            vec![LogLine::Set {
                keys: vec!["k".to_string()],
                value: Value::Seq(vec![Value::Int(7), Value::Int(8)])
            }]
        );
    }

    #[test]
    fn test_shared_value_keys() {
        let parsed = parse_document("a<b<c<7\n").unwrap();
        assert_eq!(
            parsed,
            vec![LogLine::Set {
                keys: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                value: Value::Int(7)
            }]
        );
    }

    #[test]
    fn test_value_containing_separator() {
        let parsed = parse_document("k<\"x<y\"\n").unwrap();
        assert_eq!(
            parsed,
            vec![LogLine::Set {
                keys: vec!["k".to_string()],
                value: Value::from("x<y")
            }]
        );
    }

    #[test]
    fn test_bare_word_value_is_not_a_key() {
        // The final segment is always the value, even when key-shaped.
        let parsed = parse_document("k<7\n").unwrap();
        assert_eq!(
            parsed,
            vec![LogLine::Set {
                keys: vec!["k".to_string()],
                value: Value::Int(7)
            }]
        );
    }

    #[test]
    fn test_remove_line() {
        let parsed = parse_document("#a #b #c\n").unwrap();
        assert_eq!(
            parsed,
            vec![LogLine::Remove {
                keys: vec!["a".to_string(), "b".to_string(), "c".to_string()]
            }]
        );
        assert_eq!(format_remove(&["a".to_string(), "b".to_string()]), "#a #b");
    }

    #[test]
    fn test_comments_blanks_and_ordering() {
        let doc = "; rewritten by hand\n\nfirst<1\n#first\nfirst<2\n";
        let parsed = parse_document(doc).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(matches!(&parsed[0], LogLine::Set { value, .. } if *value == Value::Int(1)));
        assert!(matches!(&parsed[1], LogLine::Remove { .. }));
        assert!(matches!(&parsed[2], LogLine::Set { value, .. } if *value == Value::Int(2)));
    }

    #[test]
    fn test_torn_final_line_dropped() {
        let parsed = parse_document("a<1\nb<2").unwrap();
        assert_eq!(parsed.len(), 1);

        // No newline at all: nothing durable yet.
        assert!(parse_document("a<1").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_error() {
        assert!(matches!(
            parse_document("<1\n").unwrap_err(),
            LineError::EmptyKeys { .. }
        ));
        assert!(matches!(
            parse_document("k<{broken\n").unwrap_err(),
            LineError::BadValue { .. }
        ));
        assert!(matches!(
            parse_document("# \n").unwrap_err(),
            LineError::EmptyKeys { .. }
        ));
    }
}
