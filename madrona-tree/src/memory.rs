//! In-RAM tree node.
//!
//! A sorted map from keypath bytes to tagged entries, plus the set of
//! keypaths touched since the node was created. Saving against an
//! on-disk node writes only the touched keys through.

use crate::db::DbNode;
use crate::error::TreeError;
use crate::iter::{self, ChildIter, DepthFirstIter, TreeIter};
use crate::node::Node;
use crate::ops::{self, RawRead, RawWrite, Snapshot};
use madrona_model::{Keypath, Range, Value};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default)]
pub struct MemoryNode {
    keys: Snapshot,
    diff: BTreeSet<Vec<u8>>,
}

impl MemoryNode {
    pub fn new() -> MemoryNode {
        MemoryNode::default()
    }

    /// A memory node holding the given value at its root.
    pub fn from_value(value: &Value) -> Result<MemoryNode, TreeError> {
        let mut node = MemoryNode::new();
        node.set(&Keypath::root(), None, value)?;
        node.clear_diff();
        Ok(node)
    }

    pub(crate) fn from_snapshot(keys: Snapshot) -> MemoryNode {
        MemoryNode {
            keys,
            diff: BTreeSet::new(),
        }
    }

    pub fn set(&mut self, kp: &Keypath, range: Option<Range>, value: &Value) -> Result<(), TreeError> {
        ops::set(self, kp, range, value)
    }

    pub fn delete(&mut self, kp: &Keypath, range: Option<Range>) -> Result<(), TreeError> {
        ops::delete(self, kp, range)
    }

    /// Every stored keypath in sorted order, length sentinels included.
    pub fn keypaths(&self) -> Vec<Keypath> {
        self.keys.keys().map(|k| Keypath::new(k.clone())).collect()
    }

    /// Keypaths touched since this node was created (or the diff was
    /// last cleared), including deletions.
    pub fn diffed(&self) -> Vec<Keypath> {
        self.diff.iter().map(|k| Keypath::new(k.clone())).collect()
    }

    pub fn clear_diff(&mut self) {
        self.diff.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Write the touched keypaths through to an on-disk node, placing
    /// this node's root at `at` (relative to the target).
    pub fn save_into(&self, target: &mut DbNode<'_>, at: &Keypath) -> Result<(), TreeError> {
        for key in &self.diff {
            let dest = target.absolute(&Keypath::new(key.clone()), at);
            match self.keys.get(key) {
                Some(entry) => target.put_raw(dest.into_bytes(), entry.clone())?,
                None => target.del_raw(dest.as_bytes())?,
            }
        }
        Ok(())
    }
}

impl RawRead for MemoryNode {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        Ok(self.keys.get(key).cloned())
    }

    fn subtree_raw(&self, prefix: &Keypath) -> Result<Snapshot, TreeError> {
        let mut out = Snapshot::new();
        for (key, entry) in self.keys.range(prefix.as_bytes().to_vec()..) {
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            if ops::in_subtree(prefix.as_bytes(), key) {
                out.insert(key.clone(), entry.clone());
            }
        }
        Ok(out)
    }
}

impl RawWrite for MemoryNode {
    fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), TreeError> {
        self.diff.insert(key.clone());
        self.keys.insert(key, value);
        Ok(())
    }

    fn del_raw(&mut self, key: &[u8]) -> Result<(), TreeError> {
        self.diff.insert(key.to_vec());
        self.keys.remove(key);
        Ok(())
    }
}

impl Node for MemoryNode {
    fn value(&self, kp: &Keypath, range: Option<Range>) -> Result<Option<Value>, TreeError> {
        ops::value(self, kp, range)
    }

    fn exists(&self, kp: &Keypath) -> Result<bool, TreeError> {
        ops::exists(self, kp)
    }

    fn node_type(&self, kp: &Keypath) -> Result<Option<crate::encoding::NodeType>, TreeError> {
        ops::node_type_of(self, kp)
    }

    fn length(&self, kp: &Keypath) -> Result<u64, TreeError> {
        ops::length(self, kp)
    }

    fn copy_to_memory(&self, kp: &Keypath, range: Option<Range>) -> Result<MemoryNode, TreeError> {
        copy_to_memory(self, kp, range)
    }

    fn iterator(&self, kp: &Keypath, reverse: bool, prefetch: usize) -> Result<TreeIter, TreeError> {
        iter::tree_iter(self, &Keypath::root(), kp, reverse, prefetch)
    }

    fn child_iterator(
        &self,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<ChildIter, TreeError> {
        ChildIter::over(self, &Keypath::root(), kp, reverse, prefetch)
    }

    fn depth_first_iterator(
        &self,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<DepthFirstIter, TreeError> {
        DepthFirstIter::over(self, &Keypath::root(), kp, reverse, prefetch)
    }
}

// Shared by both node kinds: a representation-preserving copy when no
// range is given, otherwise a copy of the materialized ranged value.
pub(crate) fn copy_to_memory(
    store: &impl RawRead,
    abs: &Keypath,
    range: Option<Range>,
) -> Result<MemoryNode, TreeError> {
    match range {
        None => {
            let snap = store.subtree_raw(abs)?;
            let mut keys = Snapshot::new();
            for (key, entry) in snap {
                let rel = Keypath::new(key)
                    .strip_prefix(abs)
                    .ok_or_else(|| TreeError::Corrupt("scan escaped its prefix".into()))?;
                keys.insert(rel.into_bytes(), entry);
            }
            Ok(MemoryNode::from_snapshot(keys))
        }
        Some(_) => match ops::value(store, abs, range)? {
            Some(value) => MemoryNode::from_value(&value),
            None => Ok(MemoryNode::new()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Value {
        Value::from_json(json!({
            "asdf": ["1234", 987.2, 333],
            "flo": 321.5,
            "hello": {"xyzzy": 33},
        }))
    }

    #[test]
    fn test_set_and_value_round_trip() {
        let mut node = MemoryNode::new();
        let v = fixture();
        node.set(&Keypath::root(), None, &v).unwrap();
        assert_eq!(node.value(&Keypath::root(), None).unwrap(), Some(v));
    }

    #[test]
    fn test_set_replaces_descendants() {
        let mut node = MemoryNode::new();
        node.set(&Keypath::root(), None, &fixture()).unwrap();
        node.set(
            &Keypath::from("hello"),
            None,
            &Value::from_json(json!({"other": 1})),
        )
        .unwrap();
        let hello = node.value(&Keypath::from("hello"), None).unwrap().unwrap();
        assert_eq!(hello, Value::from_json(json!({"other": 1})));
        assert!(!node.exists(&Keypath::from("hello/xyzzy")).unwrap());
    }

    #[test]
    fn test_diff_tracks_touched_keypaths() {
        let mut node = MemoryNode::new();
        node.set(&Keypath::root(), None, &fixture()).unwrap();
        node.clear_diff();
        assert!(node.diffed().is_empty());

        node.set(&Keypath::from("flo"), None, &Value::Uint(1)).unwrap();
        let diffed = node.diffed();
        assert_eq!(diffed, vec![Keypath::from("flo")]);
    }

    #[test]
    fn test_delete_subtree() {
        let mut node = MemoryNode::new();
        node.set(&Keypath::root(), None, &fixture()).unwrap();
        node.delete(&Keypath::from("asdf"), None).unwrap();
        assert!(!node.exists(&Keypath::from("asdf")).unwrap());
        assert!(node.exists(&Keypath::from("flo")).unwrap());
    }

    #[test]
    fn test_slice_delete_shrinks() {
        let mut node = MemoryNode::new();
        node.set(&Keypath::root(), None, &fixture()).unwrap();
        let kp = Keypath::from("asdf");
        node.delete(&kp.push_index(1), None).unwrap();
        assert_eq!(
            node.value(&kp, None).unwrap().unwrap(),
            Value::from_json(json!(["1234", 333]))
        );
        assert_eq!(node.length(&kp).unwrap(), 2);
    }
}
