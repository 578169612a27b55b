//! The JSON-like value AST stored in state trees.
//!
//! Values round-trip through `serde_json::Value` with numeric
//! canonicalization: non-negative integral numbers become `Uint`, negative
//! integral numbers become `Int`, everything else `Float`.

use serde::{Deserialize as _, Serialize as _};
use std::collections::BTreeMap;

/// An owned tree value: scalar, ordered sequence, or string-keyed map.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Uint(u64),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Slice(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Convert from a parsed JSON document, canonicalizing numbers.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Slice(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as JSON. Bytes have no JSON literal and render as lowercase
    /// hex strings; the textual patch grammar never carries bytes.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Uint(u) => serde_json::Value::from(*u),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            Value::Slice(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Slice(_) | Value::Map(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::Slice(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a map entry by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Short name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Uint(_) => "uint64",
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Slice(_) => "slice",
            Value::Map(_) => "map",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(json))
    }
}

/// Splice `replacement` into `s` over the byte range `[lo, hi)`.
///
/// Bounds must already be normalized against `s.len()` except that `hi`
/// may exceed it: the contract is that the tail beyond the string's end is
/// dropped, i.e. the result is `s[..lo] + replacement` in that case.
pub fn splice_str(s: &str, lo: u64, hi: u64, replacement: &str) -> String {
    let bytes = s.as_bytes();
    let lo = (lo as usize).min(bytes.len());
    let mut out = Vec::with_capacity(bytes.len() + replacement.len());
    out.extend_from_slice(&bytes[..lo]);
    out.extend_from_slice(replacement.as_bytes());
    if (hi as usize) <= bytes.len() {
        out.extend_from_slice(&bytes[hi as usize..]);
    } else {
        tracing::warn!(
            len = bytes.len(),
            hi,
            "string splice past end of value; dropping tail"
        );
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_canonicalization() {
        let v = Value::from_json(json!({"a": 321, "b": -4, "c": 2.5}));
        assert_eq!(v.get("a"), Some(&Value::Uint(321)));
        assert_eq!(v.get("b"), Some(&Value::Int(-4)));
        assert_eq!(v.get("c"), Some(&Value::Float(2.5)));
    }

    #[test]
    fn test_json_round_trip() {
        let v = Value::from_json(json!({
            "asdf": ["1234", 987.2, 333],
            "flo": 321.5,
            "hello": {"xyzzy": 33},
            "yup": true,
            "nope": null,
        }));
        let back = Value::from_json(v.to_json());
        assert_eq!(v, back);
    }

    #[test]
    fn test_splice_str_middle() {
        assert_eq!(splice_str("abcdefgh", 3, 6, "xx"), "abcxxgh");
    }

    #[test]
    fn test_splice_str_drops_tail_past_end() {
        assert_eq!(splice_str("abc", 1, 10, "Z"), "aZ");
    }

    #[test]
    fn test_splice_str_append() {
        assert_eq!(splice_str("abc", 3, 3, "def"), "abcdef");
    }
}
