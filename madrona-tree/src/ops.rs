//! Read and write algorithms shared by the in-memory and on-disk nodes.
//!
//! Both node kinds expose the same raw view: a sorted map from keypath
//! bytes to tagged entry bytes. Everything here — materialization,
//! subtree replacement, range splicing, ancestor maintenance — is written
//! once against that view.

use crate::encoding::{self, Decoded, NodeType};
use crate::error::TreeError;
use madrona_model::keypath::Part;
use madrona_model::value::splice_str;
use madrona_model::{Keypath, Range, Value, INDEX_SEPARATOR, KEYPATH_SEPARATOR};
use std::collections::BTreeMap;

/// A sorted snapshot of one subtree: keypath bytes to tagged entry bytes.
pub(crate) type Snapshot = BTreeMap<Vec<u8>, Vec<u8>>;

/// Raw single-key and subtree reads over a node's merged view.
pub(crate) trait RawRead {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError>;

    /// All part-aligned keys under `prefix` (including `prefix` itself),
    /// in sorted order.
    fn subtree_raw(&self, prefix: &Keypath) -> Result<Snapshot, TreeError>;
}

/// Raw writes. Buffering and durability are the implementor's concern.
pub(crate) trait RawWrite: RawRead {
    fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), TreeError>;
    fn del_raw(&mut self, key: &[u8]) -> Result<(), TreeError>;
}

/// Part-aligned subtree membership on raw key bytes.
pub(crate) fn in_subtree(prefix: &[u8], key: &[u8]) -> bool {
    if prefix.is_empty() {
        return true;
    }
    if !key.starts_with(prefix) {
        return false;
    }
    key.len() == prefix.len()
        || key[prefix.len()] == KEYPATH_SEPARATOR
        || key[prefix.len()] == INDEX_SEPARATOR
}

// The remainder of `key` under `prefix`, with a leading '/' stripped.
fn tail_of<'a>(prefix: &[u8], key: &'a [u8]) -> &'a [u8] {
    let rest = &key[prefix.len()..];
    if !prefix.is_empty() && rest.first() == Some(&KEYPATH_SEPARATOR) {
        &rest[1..]
    } else {
        rest
    }
}

// Direct map children of `prefix` within a snapshot: keys one string
// component deeper, in sorted (lexicographic) order.
fn direct_children(snap: &Snapshot, prefix: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for (key, _) in snap.range(prefix.to_vec()..) {
        if !key.starts_with(prefix) {
            break;
        }
        if key.len() == prefix.len() || !in_subtree(prefix, key) {
            continue;
        }
        let rest = tail_of(prefix, key);
        if rest.first() == Some(&INDEX_SEPARATOR) {
            continue; // sequence entry, not a map child
        }
        if rest
            .iter()
            .any(|&b| b == KEYPATH_SEPARATOR || b == INDEX_SEPARATOR)
        {
            continue; // deeper descendant
        }
        out.push(key.clone());
    }
    out
}

fn child_name(prefix: &[u8], key: &[u8]) -> String {
    String::from_utf8_lossy(tail_of(prefix, key)).into_owned()
}

fn snapshot_slice_len(snap: &Snapshot, kp: &Keypath) -> Result<u64, TreeError> {
    let raw = snap
        .get(encoding::len_key(kp).as_bytes())
        .ok_or_else(|| TreeError::Corrupt(format!("slice {:?} missing length sentinel", kp)))?;
    encoding::decode_len(raw)
}

// Materialize the subtree at `kp` from a snapshot.
fn assemble(snap: &Snapshot, kp: &Keypath) -> Result<Option<Value>, TreeError> {
    let raw = match snap.get(kp.as_bytes()) {
        Some(raw) => raw,
        None => return Ok(None),
    };
    match encoding::decode_node(raw)? {
        Decoded::Scalar(v) => Ok(Some(v)),
        Decoded::Map => {
            let mut entries = BTreeMap::new();
            for child in direct_children(snap, kp.as_bytes()) {
                let name = child_name(kp.as_bytes(), &child);
                let value = assemble(snap, &Keypath::new(child))?.ok_or_else(|| {
                    TreeError::Corrupt(format!("map {:?} has a child with no entry", kp))
                })?;
                entries.insert(name, value);
            }
            Ok(Some(Value::Map(entries)))
        }
        Decoded::Slice => {
            let len = snapshot_slice_len(snap, kp)?;
            let mut items = Vec::with_capacity(len as usize);
            for i in 0..len {
                let item = assemble(snap, &kp.push_index(i))?.ok_or_else(|| {
                    TreeError::Corrupt(format!("slice {:?} missing entry {}", kp, i))
                })?;
                items.push(item);
            }
            Ok(Some(Value::Slice(items)))
        }
    }
}

pub(crate) fn node_type_of(
    store: &impl RawRead,
    kp: &Keypath,
) -> Result<Option<NodeType>, TreeError> {
    match store.get_raw(kp.as_bytes())? {
        Some(raw) => Ok(Some(encoding::decode_node(&raw)?.node_type())),
        None => Ok(None),
    }
}

pub(crate) fn exists(store: &impl RawRead, kp: &Keypath) -> Result<bool, TreeError> {
    Ok(store.get_raw(kp.as_bytes())?.is_some())
}

fn slice_len(store: &impl RawRead, kp: &Keypath) -> Result<u64, TreeError> {
    let raw = store
        .get_raw(encoding::len_key(kp).as_bytes())?
        .ok_or_else(|| TreeError::Corrupt(format!("slice {:?} missing length sentinel", kp)))?;
    encoding::decode_len(&raw)
}

/// Length of the node at `kp`: slice length, string byte length, or map
/// child count.
pub(crate) fn length(store: &impl RawRead, kp: &Keypath) -> Result<u64, TreeError> {
    let raw = store.get_raw(kp.as_bytes())?.ok_or(TreeError::NotFound)?;
    match encoding::decode_node(&raw)? {
        Decoded::Slice => slice_len(store, kp),
        Decoded::Scalar(Value::Str(s)) => Ok(s.len() as u64),
        Decoded::Map => {
            let snap = store.subtree_raw(kp)?;
            Ok(direct_children(&snap, kp.as_bytes()).len() as u64)
        }
        Decoded::Scalar(_) => Ok(0),
    }
}

/// Materialize the subtree at `kp`, optionally narrowed to a range.
pub(crate) fn value(
    store: &impl RawRead,
    kp: &Keypath,
    range: Option<Range>,
) -> Result<Option<Value>, TreeError> {
    let raw = match store.get_raw(kp.as_bytes())? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let decoded = encoding::decode_node(&raw)?;
    match decoded {
        Decoded::Scalar(v) => match range {
            None => Ok(Some(v)),
            Some(r) => match v {
                Value::Str(s) => {
                    let (lo, hi) = r
                        .bounds_for_read(s.len() as u64)
                        .ok_or(TreeError::InvalidRange)?;
                    let bytes = &s.as_bytes()[lo as usize..hi as usize];
                    Ok(Some(Value::Str(
                        String::from_utf8_lossy(bytes).into_owned(),
                    )))
                }
                other => Err(TreeError::WrongNodeType {
                    expected: "map, slice, or string",
                    found: other.kind(),
                }),
            },
        },
        Decoded::Map => {
            let snap = store.subtree_raw(kp)?;
            match range {
                None => assemble(&snap, kp),
                Some(r) => {
                    // a ranged map read treats the sorted key view as a sequence
                    let children = direct_children(&snap, kp.as_bytes());
                    let (lo, hi) = r
                        .bounds_for_read(children.len() as u64)
                        .ok_or(TreeError::InvalidRange)?;
                    let mut entries = BTreeMap::new();
                    for child in &children[lo as usize..hi as usize] {
                        let name = child_name(kp.as_bytes(), child);
                        let value = assemble(&snap, &Keypath::new(child.clone()))?
                            .ok_or_else(|| {
                                TreeError::Corrupt(format!("map {:?} has a child with no entry", kp))
                            })?;
                        entries.insert(name, value);
                    }
                    Ok(Some(Value::Map(entries)))
                }
            }
        }
        Decoded::Slice => {
            let snap = store.subtree_raw(kp)?;
            let len = snapshot_slice_len(&snap, kp)?;
            let (lo, hi) = match range {
                None => (0, len),
                Some(r) => r.bounds_for_read(len).ok_or(TreeError::InvalidRange)?,
            };
            let mut items = Vec::with_capacity((hi - lo) as usize);
            for i in lo..hi {
                let item = assemble(&snap, &kp.push_index(i))?.ok_or_else(|| {
                    TreeError::Corrupt(format!("slice {:?} missing entry {}", kp, i))
                })?;
                items.push(item);
            }
            Ok(Some(Value::Slice(items)))
        }
    }
}

// Write a value subtree rooted at `kp`. The target must already be clear.
fn write_value(store: &mut impl RawWrite, kp: &Keypath, value: &Value) -> Result<(), TreeError> {
    match value {
        Value::Map(entries) => {
            store.put_raw(kp.as_bytes().to_vec(), vec![encoding::TAG_MAP])?;
            for (name, child) in entries {
                write_value(store, &kp.push(name.as_bytes()), child)?;
            }
        }
        Value::Slice(items) => {
            store.put_raw(kp.as_bytes().to_vec(), vec![encoding::TAG_SLICE])?;
            store.put_raw(
                encoding::len_key(kp).into_bytes(),
                encoding::encode_len(items.len() as u64),
            )?;
            for (i, item) in items.iter().enumerate() {
                write_value(store, &kp.push_index(i as u64), item)?;
            }
        }
        scalar => {
            let encoded = encoding::encode_scalar(scalar)
                .ok_or_else(|| TreeError::Corrupt("container where scalar expected".into()))?;
            store.put_raw(kp.as_bytes().to_vec(), encoded)?;
        }
    }
    Ok(())
}

fn delete_subtree(store: &mut impl RawWrite, kp: &Keypath) -> Result<(), TreeError> {
    let keys: Vec<Vec<u8>> = store.subtree_raw(kp)?.into_keys().collect();
    for key in keys {
        store.del_raw(&key)?;
    }
    Ok(())
}

// Rekey the subtree at `from` to `to`, clearing anything at `to` first.
fn move_subtree(store: &mut impl RawWrite, from: &Keypath, to: &Keypath) -> Result<(), TreeError> {
    delete_subtree(store, to)?;
    let snap = store.subtree_raw(from)?;
    for (key, entry) in snap {
        let mut new_key = to.as_bytes().to_vec();
        new_key.extend_from_slice(&key[from.len()..]);
        store.del_raw(&key)?;
        store.put_raw(new_key, entry)?;
    }
    Ok(())
}

fn write_container(
    store: &mut impl RawWrite,
    kp: &Keypath,
    needed: NodeType,
) -> Result<(), TreeError> {
    match needed {
        NodeType::Map => store.put_raw(kp.as_bytes().to_vec(), vec![encoding::TAG_MAP]),
        NodeType::Slice => {
            store.put_raw(kp.as_bytes().to_vec(), vec![encoding::TAG_SLICE])?;
            store.put_raw(encoding::len_key(kp).into_bytes(), encoding::encode_len(0))
        }
        NodeType::Value(_) => unreachable!("ancestors are always containers"),
    }
}

fn ensure_container(
    store: &mut impl RawWrite,
    kp: &Keypath,
    needed: NodeType,
) -> Result<(), TreeError> {
    match node_type_of(store, kp)? {
        Some(found) if found == needed => Ok(()),
        Some(NodeType::Map) | Some(NodeType::Slice) => {
            // container of the wrong kind: replace it wholesale
            delete_subtree(store, kp)?;
            write_container(store, kp, needed)
        }
        Some(NodeType::Value(_)) => {
            store.del_raw(kp.as_bytes())?;
            write_container(store, kp, needed)
        }
        None => write_container(store, kp, needed),
    }
}

// Every ancestor of `kp` must exist as a container of the kind implied by
// the next component (index part -> slice, string part -> map).
fn ensure_ancestors(store: &mut impl RawWrite, kp: &Keypath) -> Result<(), TreeError> {
    if kp.is_root() {
        return Ok(());
    }
    let parts = kp.parts();
    let mut anc = Keypath::root();
    for part in &parts {
        let needed = match part {
            Part::Index(_) => NodeType::Slice,
            Part::Key(_) => NodeType::Map,
        };
        ensure_container(store, &anc, needed)?;
        anc = match part {
            Part::Key(k) => anc.push(k),
            Part::Index(i) => anc.push_index(*i),
        };
    }
    Ok(())
}

// Splice bounds for strings tolerate `hi` past the end of the value; the
// tail beyond the current length is dropped rather than preserved.
fn string_splice_bounds(r: &Range, len: u64) -> Result<(u64, u64), TreeError> {
    if let Some(bounds) = r.bounds_for_splice(len) {
        return Ok(bounds);
    }
    if r.start >= 0 && r.end > r.start && (r.start as u64) <= len {
        return Ok((r.start as u64, r.end as u64));
    }
    Err(TreeError::InvalidRange)
}

fn splice_slice(
    store: &mut impl RawWrite,
    kp: &Keypath,
    r: &Range,
    items: &[Value],
) -> Result<(), TreeError> {
    let len = slice_len(store, kp)?;
    let (lo, hi) = r.bounds_for_splice(len).ok_or(TreeError::InvalidRange)?;
    let shift = items.len() as i64 - (hi - lo) as i64;

    // shift the tail [hi, len), renumbering every descendant key;
    // direction matters so moves never clobber unmoved entries
    if shift > 0 {
        for j in (hi..len).rev() {
            move_subtree(store, &kp.push_index(j), &kp.push_index((j as i64 + shift) as u64))?;
        }
    } else if shift < 0 {
        for j in hi..len {
            move_subtree(store, &kp.push_index(j), &kp.push_index((j as i64 + shift) as u64))?;
        }
    }

    for (i, item) in items.iter().enumerate() {
        let slot = kp.push_index(lo + i as u64);
        delete_subtree(store, &slot)?;
        write_value(store, &slot, item)?;
    }

    let new_len = (len as i64 + shift) as u64;
    for j in new_len..len {
        delete_subtree(store, &kp.push_index(j))?;
    }
    store.put_raw(
        encoding::len_key(kp).into_bytes(),
        encoding::encode_len(new_len),
    )?;
    Ok(())
}

/// Write a subtree. Without a range the target subtree is replaced;
/// with a range the target must be a slice (splice) or string (character
/// splice).
pub(crate) fn set(
    store: &mut impl RawWrite,
    kp: &Keypath,
    range: Option<Range>,
    value: &Value,
) -> Result<(), TreeError> {
    match range {
        None => {
            ensure_ancestors(store, kp)?;
            delete_subtree(store, kp)?;
            write_value(store, kp, value)?;
            // a direct write at an index keypath keeps its slice's length honest
            if let Some((parent, idx)) = kp.pop_index() {
                let len = slice_len(store, &parent)?;
                if idx + 1 > len {
                    store.put_raw(
                        encoding::len_key(&parent).into_bytes(),
                        encoding::encode_len(idx + 1),
                    )?;
                }
            }
            Ok(())
        }
        Some(r) => {
            let raw = store.get_raw(kp.as_bytes())?.ok_or(TreeError::NotFound)?;
            match encoding::decode_node(&raw)? {
                Decoded::Scalar(Value::Str(cur)) => {
                    let replacement = value.as_str().ok_or_else(|| TreeError::WrongNodeType {
                        expected: "string",
                        found: value.kind(),
                    })?;
                    let (lo, hi) = string_splice_bounds(&r, cur.len() as u64)?;
                    let spliced = splice_str(&cur, lo, hi, replacement);
                    let encoded = encoding::encode_scalar(&Value::Str(spliced))
                        .expect("strings are scalars");
                    store.put_raw(kp.as_bytes().to_vec(), encoded)
                }
                Decoded::Slice => match value {
                    Value::Slice(items) => splice_slice(store, kp, &r, items),
                    other => Err(TreeError::WrongNodeType {
                        expected: "slice",
                        found: other.kind(),
                    }),
                },
                other => Err(TreeError::WrongNodeType {
                    expected: "slice or string",
                    found: other.node_type().name(),
                }),
            }
        }
    }
}

/// Remove a subtree, or splice-shrink a slice or string.
pub(crate) fn delete(
    store: &mut impl RawWrite,
    kp: &Keypath,
    range: Option<Range>,
) -> Result<(), TreeError> {
    match range {
        Some(r) => {
            let raw = store.get_raw(kp.as_bytes())?.ok_or(TreeError::NotFound)?;
            match encoding::decode_node(&raw)? {
                Decoded::Slice => splice_slice(store, kp, &r, &[]),
                Decoded::Scalar(Value::Str(cur)) => {
                    let (lo, hi) = string_splice_bounds(&r, cur.len() as u64)?;
                    let spliced = splice_str(&cur, lo, hi, "");
                    let encoded = encoding::encode_scalar(&Value::Str(spliced))
                        .expect("strings are scalars");
                    store.put_raw(kp.as_bytes().to_vec(), encoded)
                }
                other => Err(TreeError::WrongNodeType {
                    expected: "slice or string",
                    found: other.node_type().name(),
                }),
            }
        }
        None => {
            if store.get_raw(kp.as_bytes())?.is_none() {
                return Ok(());
            }
            // removing one entry of a slice is a splice-shrink so the
            // remaining indices stay contiguous
            if let Some((parent, idx)) = kp.pop_index() {
                if matches!(node_type_of(store, &parent)?, Some(NodeType::Slice)) {
                    return splice_slice(
                        store,
                        &parent,
                        &Range::new(idx as i64, idx as i64 + 1),
                        &[],
                    );
                }
            }
            delete_subtree(store, kp)
        }
    }
}
