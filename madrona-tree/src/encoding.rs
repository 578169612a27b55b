//! Fixed-width tagged encoding of tree nodes.
//!
//! Every stored key's value begins with a one-byte type tag. Map and
//! slice keys store only the tag (their children live at longer
//! keypaths); scalars append a fixed-width payload:
//!
//! - uint64 / int64: 8-byte big-endian
//! - float64: IEEE 754 big-endian
//! - bool: 1 byte
//! - string / bytes: raw tail
//! - null: empty payload
//!
//! A slice's length lives under the sentinel sub-key `<kp>/#len` as a
//! bare 8-byte big-endian integer (no tag; it is metadata, not a node).

use crate::error::TreeError;
use madrona_model::{Keypath, Value};

pub const TAG_MAP: u8 = b'm';
pub const TAG_SLICE: u8 = b's';
pub const TAG_STR: u8 = b'S';
pub const TAG_BYTES: u8 = b'B';
pub const TAG_UINT: u8 = b'u';
pub const TAG_INT: u8 = b'i';
pub const TAG_FLOAT: u8 = b'f';
pub const TAG_BOOL: u8 = b'b';
pub const TAG_NULL: u8 = b'0';

/// The last component of a slice's length sentinel key.
pub const LEN_SENTINEL: &[u8] = b"#len";

/// Scalar kinds a value node can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Bytes,
    Uint,
    Int,
    Float,
    Bool,
    Null,
}

/// The type of a tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Map,
    Slice,
    Value(ValueKind),
}

impl NodeType {
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Map => "map",
            NodeType::Slice => "slice",
            NodeType::Value(ValueKind::Str) => "string",
            NodeType::Value(ValueKind::Bytes) => "bytes",
            NodeType::Value(ValueKind::Uint) => "uint64",
            NodeType::Value(ValueKind::Int) => "int64",
            NodeType::Value(ValueKind::Float) => "float64",
            NodeType::Value(ValueKind::Bool) => "bool",
            NodeType::Value(ValueKind::Null) => "null",
        }
    }

    pub fn from_tag(tag: u8) -> Result<NodeType, TreeError> {
        Ok(match tag {
            TAG_MAP => NodeType::Map,
            TAG_SLICE => NodeType::Slice,
            TAG_STR => NodeType::Value(ValueKind::Str),
            TAG_BYTES => NodeType::Value(ValueKind::Bytes),
            TAG_UINT => NodeType::Value(ValueKind::Uint),
            TAG_INT => NodeType::Value(ValueKind::Int),
            TAG_FLOAT => NodeType::Value(ValueKind::Float),
            TAG_BOOL => NodeType::Value(ValueKind::Bool),
            TAG_NULL => NodeType::Value(ValueKind::Null),
            other => return Err(TreeError::Corrupt(format!("unknown node tag {:#04x}", other))),
        })
    }
}

/// Encode a scalar value as tag + payload. Maps and slices are not
/// scalars; their stored bytes are the bare tag.
pub fn encode_scalar(value: &Value) -> Option<Vec<u8>> {
    let mut out;
    match value {
        Value::Null => out = vec![TAG_NULL],
        Value::Bool(b) => out = vec![TAG_BOOL, *b as u8],
        Value::Uint(u) => {
            out = Vec::with_capacity(9);
            out.push(TAG_UINT);
            out.extend_from_slice(&u.to_be_bytes());
        }
        Value::Int(i) => {
            out = Vec::with_capacity(9);
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Float(f) => {
            out = Vec::with_capacity(9);
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(s) => {
            out = Vec::with_capacity(1 + s.len());
            out.push(TAG_STR);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out = Vec::with_capacity(1 + b.len());
            out.push(TAG_BYTES);
            out.extend_from_slice(b);
        }
        Value::Slice(_) | Value::Map(_) => return None,
    }
    Some(out)
}

/// A decoded stored entry: a container marker or a scalar value.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Map,
    Slice,
    Scalar(Value),
}

impl Decoded {
    pub fn node_type(&self) -> NodeType {
        match self {
            Decoded::Map => NodeType::Map,
            Decoded::Slice => NodeType::Slice,
            Decoded::Scalar(v) => NodeType::Value(match v {
                Value::Str(_) => ValueKind::Str,
                Value::Bytes(_) => ValueKind::Bytes,
                Value::Uint(_) => ValueKind::Uint,
                Value::Int(_) => ValueKind::Int,
                Value::Float(_) => ValueKind::Float,
                Value::Bool(_) => ValueKind::Bool,
                _ => ValueKind::Null,
            }),
        }
    }
}

pub fn decode_node(bytes: &[u8]) -> Result<Decoded, TreeError> {
    let (&tag, payload) = bytes
        .split_first()
        .ok_or_else(|| TreeError::Corrupt("empty node entry".into()))?;
    let fixed = |n: usize| -> Result<[u8; 8], TreeError> {
        if payload.len() != n {
            return Err(TreeError::Corrupt(format!(
                "expected {}-byte payload, got {}",
                n,
                payload.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(payload);
        Ok(buf)
    };
    Ok(match tag {
        TAG_MAP => Decoded::Map,
        TAG_SLICE => Decoded::Slice,
        TAG_NULL => Decoded::Scalar(Value::Null),
        TAG_BOOL => Decoded::Scalar(Value::Bool(payload.first().copied().unwrap_or(0) != 0)),
        TAG_UINT => Decoded::Scalar(Value::Uint(u64::from_be_bytes(fixed(8)?))),
        TAG_INT => Decoded::Scalar(Value::Int(i64::from_be_bytes(fixed(8)?))),
        TAG_FLOAT => Decoded::Scalar(Value::Float(f64::from_be_bytes(fixed(8)?))),
        TAG_STR => Decoded::Scalar(Value::Str(
            String::from_utf8_lossy(payload).into_owned(),
        )),
        TAG_BYTES => Decoded::Scalar(Value::Bytes(payload.to_vec())),
        other => return Err(TreeError::Corrupt(format!("unknown node tag {:#04x}", other))),
    })
}

/// The sentinel key holding a slice's length.
pub fn len_key(kp: &Keypath) -> Keypath {
    kp.push(LEN_SENTINEL)
}

pub fn encode_len(len: u64) -> Vec<u8> {
    len.to_be_bytes().to_vec()
}

pub fn decode_len(bytes: &[u8]) -> Result<u64, TreeError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TreeError::Corrupt("bad slice length sentinel".into()))?;
    Ok(u64::from_be_bytes(arr))
}

/// If `key` is a length sentinel, the keypath of the slice it belongs to.
pub fn sentinel_owner(key: &[u8]) -> Option<&[u8]> {
    let suffix_len = LEN_SENTINEL.len() + 1; // '/' + "#len"
    if key.len() > suffix_len {
        let (head, tail) = key.split_at(key.len() - suffix_len);
        if tail[0] == madrona_model::KEYPATH_SEPARATOR && &tail[1..] == LEN_SENTINEL {
            return Some(head);
        }
    }
    // a root-level slice stores its sentinel with no separator
    if key == LEN_SENTINEL {
        return Some(&[]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Uint(333),
            Value::Int(-44),
            Value::Float(987.2),
            Value::Str("asdf123".into()),
            Value::Bytes(vec![9, 5, 7]),
        ] {
            let encoded = encode_scalar(&v).unwrap();
            assert_eq!(decode_node(&encoded).unwrap(), Decoded::Scalar(v));
        }
    }

    #[test]
    fn test_containers_are_not_scalars() {
        assert!(encode_scalar(&Value::Map(Default::default())).is_none());
        assert!(encode_scalar(&Value::Slice(vec![])).is_none());
    }

    #[test]
    fn test_len_round_trip() {
        assert_eq!(decode_len(&encode_len(12345)).unwrap(), 12345);
    }

    #[test]
    fn test_sentinel_owner() {
        let kp = Keypath::from("foo/slice");
        let sentinel = len_key(&kp);
        assert_eq!(sentinel_owner(sentinel.as_bytes()), Some(b"foo/slice".as_ref()));
        assert_eq!(sentinel_owner(b"#len"), Some(b"".as_ref()));
        assert_eq!(sentinel_owner(b"foo/slice"), None);
        assert_eq!(sentinel_owner(b"foo/xlen"), None);
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        assert!(matches!(decode_node(&[0xff]), Err(TreeError::Corrupt(_))));
        assert!(matches!(decode_node(&[]), Err(TreeError::Corrupt(_))));
    }
}
