//! Resolvers fold one patch into a subtree value.
//!
//! A subtree opts into a resolver by holding a `Merge-Type` child whose
//! `Content-Type` names a registered resolver (e.g. `resolver/dumb`).
//! When a patch is applied, the innermost configured resolver at or above
//! the patch's keypath wins; with none configured the dumb resolver is
//! used. Resolvers never recurse into subtrees holding their own
//! `Merge-Type`.

use crate::error::ResolverError;
use madrona_model::{value::splice_str, Patch, Range, Value};

/// Folds one patch into the materialized subtree it is registered on.
/// `current` is `None` when the subtree does not exist yet.
pub trait Resolver: Send + Sync {
    fn resolve(&self, current: Option<Value>, patch: &Patch) -> Result<Value, ResolverError>;
}

/// Builds a resolver from its per-subtree config (the `value` entry of
/// the `Merge-Type` node).
pub trait ResolverFactory: Send + Sync {
    fn make(&self, config: &Value) -> Result<Box<dyn Resolver>, ResolverError>;
}

/// The baseline resolver: apply the patch literally, last write wins,
/// creating intermediate maps wherever the path diverges from the
/// existing tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct DumbResolver;

// Splice bounds tolerate `hi` past the end; the tail beyond the current
// length is dropped rather than preserved.
fn splice_bounds(r: &Range, len: u64) -> Result<(u64, u64), ResolverError> {
    if let Some(bounds) = r.bounds_for_splice(len) {
        return Ok(bounds);
    }
    if r.start >= 0 && r.end > r.start && (r.start as u64) <= len {
        return Ok((r.start as u64, r.end as u64));
    }
    Err(ResolverError::InvalidRange)
}

// Apply a (possibly ranged) patch value to one slot. Ranged application
// dispatches on the incoming value's kind: strings splice into strings,
// everything else splices into sequences; a mismatched current value is
// simply replaced.
fn apply_at(slot: &mut Value, range: Option<Range>, value: &Value) -> Result<(), ResolverError> {
    let range = match range {
        None => {
            *slot = value.clone();
            return Ok(());
        }
        Some(r) => r,
    };

    match value {
        Value::Str(replacement) => match slot {
            Value::Str(cur) => {
                let (lo, hi) = splice_bounds(&range, cur.len() as u64)?;
                *slot = Value::Str(splice_str(cur, lo, hi, replacement));
            }
            _ => *slot = value.clone(),
        },
        other => match slot {
            Value::Slice(cur) => {
                let (lo, hi) = splice_bounds(&range, cur.len() as u64)?;
                let items: Vec<Value> = match other {
                    Value::Slice(items) => items.clone(),
                    single => vec![single.clone()],
                };
                let mut next = Vec::with_capacity(cur.len() + items.len());
                next.extend_from_slice(&cur[..lo as usize]);
                next.extend(items);
                if (hi as usize) <= cur.len() {
                    next.extend_from_slice(&cur[hi as usize..]);
                }
                *slot = Value::Slice(next);
            }
            _ => *slot = value.clone(),
        },
    }
    Ok(())
}

// Explicit path descent, forcing a map at every level and recursing into
// the named child until the target slot is reached.
fn set_path(
    slot: &mut Value,
    keys: &[String],
    range: Option<Range>,
    value: &Value,
) -> Result<(), ResolverError> {
    let (key, rest) = match keys.split_first() {
        None => return apply_at(slot, range, value),
        Some(split) => split,
    };
    if !matches!(slot, Value::Map(_)) {
        *slot = Value::Map(Default::default());
    }
    let entries = match slot {
        Value::Map(entries) => entries,
        _ => unreachable!("slot was just forced to a map"),
    };
    let child = entries.entry(key.clone()).or_insert(Value::Null);
    set_path(child, rest, range, value)
}

impl Resolver for DumbResolver {
    fn resolve(&self, current: Option<Value>, patch: &Patch) -> Result<Value, ResolverError> {
        let mut root = current.unwrap_or(Value::Null);
        set_path(&mut root, &patch.keys, patch.range, &patch.value)?;
        Ok(root)
    }
}

impl ResolverFactory for DumbResolver {
    fn make(&self, _config: &Value) -> Result<Box<dyn Resolver>, ResolverError> {
        Ok(Box::new(DumbResolver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(current: Option<serde_json::Value>, patch: &str) -> Value {
        DumbResolver
            .resolve(
                current.map(Value::from_json),
                &Patch::parse(patch).unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_root_replacement() {
        let got = resolve(None, r#" = {"a": 1}"#);
        assert_eq!(got, Value::from_json(json!({"a": 1})));
    }

    #[test]
    fn test_creates_intermediate_maps() {
        let got = resolve(None, r#".a.b.c = "deep""#);
        assert_eq!(got, Value::from_json(json!({"a": {"b": {"c": "deep"}}})));
    }

    #[test]
    fn test_last_write_wins_over_scalar() {
        let got = resolve(Some(json!({"a": 5})), r#".a.b = 1"#);
        assert_eq!(got, Value::from_json(json!({"a": {"b": 1}})));
    }

    #[test]
    fn test_preserves_siblings() {
        let got = resolve(Some(json!({"a": {"x": 1}, "z": true})), r#".a.y = 2"#);
        assert_eq!(got, Value::from_json(json!({"a": {"x": 1, "y": 2}, "z": true})));
    }

    #[test]
    fn test_string_range_splice() {
        let got = resolve(Some(json!({"s": "abcdefgh"})), r#".s[3:6] = "xx""#);
        assert_eq!(got, Value::from_json(json!({"s": "abcxxgh"})));
    }

    #[test]
    fn test_string_range_drops_tail_past_end() {
        let got = resolve(Some(json!({"s": "abc"})), r#".s[1:9] = "Z""#);
        assert_eq!(got, Value::from_json(json!({"s": "aZ"})));
    }

    #[test]
    fn test_slice_range_splice() {
        let got = resolve(
            Some(json!({"log": [1, 2, 3, 4]})),
            r#".log[1:3] = [5, 6, 7, 8]"#,
        );
        assert_eq!(got, Value::from_json(json!({"log": [1, 5, 6, 7, 8, 4]})));
    }

    #[test]
    fn test_slice_range_single_element() {
        let got = resolve(Some(json!({"log": [1, 2, 3]})), r#".log[1:2] = true"#);
        assert_eq!(got, Value::from_json(json!({"log": [1, true, 3]})));
    }

    #[test]
    fn test_range_into_missing_slot_sets_value() {
        let got = resolve(None, r#".log[0:0] = [1]"#);
        assert_eq!(got, Value::from_json(json!({"log": [1]})));
    }
}
