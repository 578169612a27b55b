//! Iterators over tree nodes.
//!
//! All four variants walk a sorted snapshot of the subtree taken at
//! construction time, so they never hold a live storage transaction and
//! release everything on drop. Keypaths are yielded relative to the node
//! that created the iterator.

use crate::encoding::{self, NodeType};
use crate::error::TreeError;
use crate::ops::{self, RawRead};
use madrona_model::{Keypath, INDEX_SEPARATOR, KEYPATH_SEPARATOR};

/// One visited node: its keypath and type.
#[derive(Clone, Debug, PartialEq)]
pub struct IterNode {
    pub keypath: Keypath,
    pub node_type: NodeType,
}

// Collect the subtree at `frame.join(kp)`, relativized to `frame`,
// with slice length sentinels filtered out.
pub(crate) fn collect_subtree(
    store: &impl RawRead,
    frame: &Keypath,
    kp: &Keypath,
    prefetch: usize,
) -> Result<Vec<IterNode>, TreeError> {
    let abs = frame.join(kp);
    let snap = store.subtree_raw(&abs)?;
    let mut out = Vec::with_capacity(prefetch.max(snap.len()));
    for (key, raw) in &snap {
        if let Some(owner) = encoding::sentinel_owner(key) {
            if matches!(
                snap.get(owner).map(|r| r.first().copied()),
                Some(Some(encoding::TAG_SLICE))
            ) {
                continue;
            }
        }
        let keypath = Keypath::new(key.clone())
            .strip_prefix(frame)
            .ok_or_else(|| TreeError::Corrupt("scan escaped its prefix".into()))?;
        let node_type = encoding::decode_node(raw)?.node_type();
        out.push(IterNode { keypath, node_type });
    }
    Ok(out)
}

// True when `key` is exactly one component (string or index) below `prefix`.
fn is_direct_child(prefix: &[u8], key: &[u8]) -> bool {
    if key.len() <= prefix.len() || !ops::in_subtree(prefix, key) {
        return false;
    }
    let rest = &key[prefix.len()..];
    match rest.first() {
        Some(&INDEX_SEPARATOR) => rest.len() == 9,
        Some(&KEYPATH_SEPARATOR) if !prefix.is_empty() => !rest[1..]
            .iter()
            .any(|&b| b == KEYPATH_SEPARATOR || b == INDEX_SEPARATOR),
        Some(_) if prefix.is_empty() => !rest
            .iter()
            .any(|&b| b == KEYPATH_SEPARATOR || b == INDEX_SEPARATOR),
        _ => false,
    }
}

/// Forward (or reverse) iterator over a subtree, root included, in
/// keypath order.
pub struct TreeIter {
    entries: Vec<IterNode>,
    pos: usize,
    reverse: bool,
}

impl TreeIter {
    pub(crate) fn new(entries: Vec<IterNode>, reverse: bool) -> TreeIter {
        TreeIter {
            entries,
            pos: 0,
            reverse,
        }
    }

    /// Remaining number of nodes.
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.pos
    }

    /// Iterate the subtree under `kp` (a keypath in this iterator's
    /// frame) without disturbing this iterator's own position. The child
    /// borrows the parent's snapshot; the parent's cursor is untouched
    /// for the child's whole lifetime.
    pub fn nested(&self, kp: &Keypath, reverse: bool) -> NestedIter<'_> {
        let indices: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].keypath.starts_with(kp))
            .collect();
        NestedIter {
            parent: self,
            indices,
            pos: 0,
            reverse,
        }
    }
}

impl Iterator for TreeIter {
    type Item = IterNode;

    fn next(&mut self) -> Option<IterNode> {
        if self.pos >= self.entries.len() {
            return None;
        }
        let idx = if self.reverse {
            self.entries.len() - 1 - self.pos
        } else {
            self.pos
        };
        self.pos += 1;
        Some(self.entries[idx].clone())
    }
}

/// Nested iterator over a subtree of an existing iterator's snapshot.
/// Dropping it leaves the parent exactly where it was.
pub struct NestedIter<'a> {
    parent: &'a TreeIter,
    indices: Vec<usize>,
    pos: usize,
    reverse: bool,
}

impl Iterator for NestedIter<'_> {
    type Item = IterNode;

    fn next(&mut self) -> Option<IterNode> {
        if self.pos >= self.indices.len() {
            return None;
        }
        let idx = if self.reverse {
            self.indices[self.indices.len() - 1 - self.pos]
        } else {
            self.indices[self.pos]
        };
        self.pos += 1;
        Some(self.parent.entries[idx].clone())
    }
}

/// Iterator over the direct children of a keypath only.
pub struct ChildIter {
    inner: TreeIter,
}

impl ChildIter {
    pub(crate) fn over(
        store: &impl RawRead,
        frame: &Keypath,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<ChildIter, TreeError> {
        let abs = frame.join(kp);
        let entries = collect_subtree(store, frame, kp, prefetch)?
            .into_iter()
            .filter(|n| {
                let abs_child = frame.join(&n.keypath);
                is_direct_child(abs.as_bytes(), abs_child.as_bytes())
            })
            .collect();
        Ok(ChildIter {
            inner: TreeIter::new(entries, reverse),
        })
    }
}

impl Iterator for ChildIter {
    type Item = IterNode;

    fn next(&mut self) -> Option<IterNode> {
        self.inner.next()
    }
}

/// Post-order traversal: descendants are yielded before their ancestors,
/// which is the reverse of [`TreeIter`]'s order.
pub struct DepthFirstIter {
    inner: TreeIter,
}

impl DepthFirstIter {
    pub(crate) fn over(
        store: &impl RawRead,
        frame: &Keypath,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<DepthFirstIter, TreeError> {
        let entries = collect_subtree(store, frame, kp, prefetch)?;
        // post-order is reverse keypath order; `reverse` flips it back
        Ok(DepthFirstIter {
            inner: TreeIter::new(entries, !reverse),
        })
    }
}

impl Iterator for DepthFirstIter {
    type Item = IterNode;

    fn next(&mut self) -> Option<IterNode> {
        self.inner.next()
    }
}

pub(crate) fn tree_iter(
    store: &impl RawRead,
    frame: &Keypath,
    kp: &Keypath,
    reverse: bool,
    prefetch: usize,
) -> Result<TreeIter, TreeError> {
    Ok(TreeIter::new(
        collect_subtree(store, frame, kp, prefetch)?,
        reverse,
    ))
}
