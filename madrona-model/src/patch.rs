//! Patches and their textual grammar.
//!
//! A patch addresses a subtree by dotted keypath, optionally narrows it to
//! a range, and carries a replacement value:
//!
//! ```text
//! .commits.deadbeef.message = "First commit\n"
//! .text.value[0:5] = "hello"
//! ["dotted.key"].inner = {"a": 1}
//!  = {"whole": "root"}
//! ```
//!
//! Keys containing characters outside the identifier set are written as
//! bracketed JSON strings. The range bounds are signed; negative indices
//! count from the end of the addressed sequence.

use crate::keypath::Keypath;
use crate::value::Value;
use serde::Deserialize as _;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Malformed(String),

    #[error("malformed patch value: {0}")]
    Value(#[from] serde_json::Error),
}

/// A half-open range `[start, end)` with signed bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub fn new(start: i64, end: i64) -> Range {
        Range { start, end }
    }

    /// Resolve signed bounds against a concrete length. When `start` is
    /// negative the whole range counts from the end, so `[-2:0]` selects
    /// the final two elements. Returns `None` when a bound falls before
    /// the start of the sequence.
    fn normalize(&self, len: u64) -> Option<(u64, u64)> {
        let len = i64::try_from(len).ok()?;
        let lo = if self.start < 0 { len + self.start } else { self.start };
        let hi = if self.start < 0 || self.end < 0 {
            len + self.end
        } else {
            self.end
        };
        if lo < 0 || hi < 0 {
            return None;
        }
        Some((lo as u64, hi as u64))
    }

    /// Bounds for reading a sequence of length `len`, or `None` when the
    /// range is invalid for that length.
    pub fn bounds_for_read(&self, len: u64) -> Option<(u64, u64)> {
        let (lo, hi) = self.normalize(len)?;
        if lo > hi || hi > len {
            return None;
        }
        // an empty range is only addressable at the very start
        if lo >= len && !(lo == 0 && hi == 0) {
            return None;
        }
        Some((lo, hi))
    }

    /// Bounds for splicing into a sequence of length `len`. Unlike reads,
    /// the empty range exactly at the end (`[len:len]`) is a valid append.
    pub fn bounds_for_splice(&self, len: u64) -> Option<(u64, u64)> {
        let (lo, hi) = self.normalize(len)?;
        if lo > hi || hi > len {
            return None;
        }
        Some((lo, hi))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.start, self.end)
    }
}

/// A structured patch: keys + optional range + value.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub keys: Vec<String>,
    pub range: Option<Range>,
    pub value: Value,
}

impl Patch {
    pub fn new(keys: Vec<String>, range: Option<Range>, value: Value) -> Patch {
        Patch { keys, range, value }
    }

    /// The patch's keypath.
    pub fn keypath(&self) -> Keypath {
        Keypath::from_parts(self.keys.iter().map(|k| k.as_bytes()))
    }

    /// Dotted keypath form matched by permission regexes, e.g. `.refs.heads`.
    pub fn dotted_keypath(&self) -> String {
        let mut out = String::new();
        for key in &self.keys {
            out.push('.');
            out.push_str(key);
        }
        out
    }

    /// The same patch re-rooted `depth` keys deeper, for handing to a
    /// resolver registered on an enclosing subtree.
    pub fn relative_to_depth(&self, depth: usize) -> Patch {
        Patch {
            keys: self.keys[depth.min(self.keys.len())..].to_vec(),
            range: self.range,
            value: self.value.clone(),
        }
    }

    /// Parse the textual form.
    pub fn parse(input: &str) -> Result<Patch, PatchError> {
        let mut rest = input.trim_start();
        let mut keys = Vec::new();
        let mut range = None;

        loop {
            if let Some(r) = rest.strip_prefix('.') {
                let end = r
                    .find(|c: char| c == '.' || c == '[' || c == '=' || c.is_whitespace())
                    .unwrap_or(r.len());
                if end == 0 {
                    return Err(PatchError::Malformed("empty key segment".into()));
                }
                keys.push(r[..end].to_string());
                rest = &r[end..];
            } else if let Some(r) = rest.strip_prefix('[') {
                let inner = r.trim_start();
                if inner.starts_with('"') {
                    let (key, after) = parse_quoted_key(inner)?;
                    let after = after.trim_start();
                    rest = after.strip_prefix(']').ok_or_else(|| {
                        PatchError::Malformed("unterminated bracketed key".into())
                    })?;
                    keys.push(key);
                } else {
                    let close = r
                        .find(']')
                        .ok_or_else(|| PatchError::Malformed("unterminated range".into()))?;
                    let body = &r[..close];
                    let (lo, hi) = body
                        .split_once(':')
                        .ok_or_else(|| PatchError::Malformed("range must be [lo:hi]".into()))?;
                    let start = lo.trim().parse::<i64>().map_err(|_| {
                        PatchError::Malformed(format!("bad range bound {:?}", lo.trim()))
                    })?;
                    let end = hi.trim().parse::<i64>().map_err(|_| {
                        PatchError::Malformed(format!("bad range bound {:?}", hi.trim()))
                    })?;
                    range = Some(Range::new(start, end));
                    rest = &r[close + 1..];
                    break; // a range only appears last, right before '='
                }
            } else {
                break;
            }
        }

        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix('=')
            .ok_or_else(|| PatchError::Malformed("expected '='".into()))?;
        let json: serde_json::Value = serde_json::from_str(rest.trim())?;
        Ok(Patch {
            keys,
            range,
            value: Value::from_json(json),
        })
    }
}

// Reads a JSON string literal starting at `s[0] == '"'`. Returns the
// decoded key and the remainder after the closing quote.
fn parse_quoted_key(s: &str) -> Result<(String, &str), PatchError> {
    let bytes = s.as_bytes();
    let mut i = 1;
    let mut escaped = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if !escaped => escaped = true,
            b'"' if !escaped => {
                let literal = &s[..=i];
                let key: String = serde_json::from_str(literal)?;
                return Ok((key, &s[i + 1..]));
            }
            _ => escaped = false,
        }
        i += 1;
    }
    Err(PatchError::Malformed("unterminated quoted key".into()))
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.keys {
            if is_plain_key(key) {
                write!(f, ".{}", key)?;
            } else {
                let quoted = serde_json::to_string(key).map_err(|_| fmt::Error)?;
                write!(f, "[{}]", quoted)?;
            }
        }
        if let Some(range) = &self.range {
            write!(f, "{}", range)?;
        }
        write!(f, " = {}", self.value.to_json())
    }
}

impl serde::Serialize for Patch {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Patch {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let s = String::deserialize(deserializer)?;
        Patch::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple() {
        let p = Patch::parse(r#".commits.deadbeef.message = "First commit\n""#).unwrap();
        assert_eq!(p.keys, vec!["commits", "deadbeef", "message"]);
        assert_eq!(p.range, None);
        assert_eq!(p.value, Value::Str("First commit\n".into()));
    }

    #[test]
    fn test_parse_root_replacement() {
        let p = Patch::parse(r#" = {"refs": {"heads": {}}, "commits": {}}"#).unwrap();
        assert!(p.keys.is_empty());
        assert_eq!(
            p.value,
            Value::from_json(json!({"refs": {"heads": {}}, "commits": {}}))
        );
    }

    #[test]
    fn test_parse_range() {
        let p = Patch::parse(r#".text.value[0:5] = "hello""#).unwrap();
        assert_eq!(p.keys, vec!["text", "value"]);
        assert_eq!(p.range, Some(Range::new(0, 5)));
    }

    #[test]
    fn test_parse_negative_range() {
        let p = Patch::parse(r#".log[-2:0] = []"#).unwrap();
        assert_eq!(p.range, Some(Range::new(-2, 0)));
    }

    #[test]
    fn test_parse_quoted_key() {
        let p = Patch::parse(r#".files["README.md"].mode = 33188"#).unwrap();
        assert_eq!(p.keys, vec!["files", "README.md", "mode"]);
        assert_eq!(p.value, Value::Uint(33188));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(Patch::parse("no leading dot = 1").is_err());
        assert!(Patch::parse(".a.b").is_err()); // no '='
        assert!(Patch::parse(".a = {not json").is_err());
        assert!(Patch::parse(".a[0:] = 1").is_err());
        assert!(Patch::parse(".a[\"unterminated] = 1").is_err());
        assert!(Patch::parse(". = 1").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for text in [
            r#".commits.deadbeef.message = "First commit\n""#,
            r#".text.value[0:5] = "hello""#,
            r#".files["README.md"].mode = 33188"#,
            r#" = {"a":1}"#,
            r#".log[-2:-1] = [1,2]"#,
        ] {
            let p = Patch::parse(text).unwrap();
            let rendered = p.to_string();
            let reparsed = Patch::parse(&rendered).unwrap();
            assert_eq!(p, reparsed, "round-trip failed for {:?}", text);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let p = Patch::parse(r#".a.b = 1"#).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"".a.b = 1""#);
        let back: Patch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_range_bounds_for_read() {
        // map of 5 entries
        assert_eq!(Range::new(0, 1).bounds_for_read(5), Some((0, 1)));
        assert_eq!(Range::new(0, 0).bounds_for_read(5), Some((0, 0)));
        assert_eq!(Range::new(5, 5).bounds_for_read(5), None);
        assert_eq!(Range::new(6, 6).bounds_for_read(5), None);
        assert_eq!(Range::new(-2, 0).bounds_for_read(5), Some((3, 5)));
        assert_eq!(Range::new(-2, -1).bounds_for_read(5), Some((3, 4)));
        assert_eq!(Range::new(1, 3).bounds_for_read(5), Some((1, 3)));
        assert_eq!(Range::new(3, 1).bounds_for_read(5), None);
    }

    #[test]
    fn test_range_bounds_for_splice() {
        assert_eq!(Range::new(4, 4).bounds_for_splice(4), Some((4, 4)));
        assert_eq!(Range::new(1, 3).bounds_for_splice(4), Some((1, 3)));
        assert_eq!(Range::new(5, 5).bounds_for_splice(4), None);
        assert_eq!(Range::new(0, 5).bounds_for_splice(4), None);
    }
}
