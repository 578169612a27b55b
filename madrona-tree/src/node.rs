//! The read contract shared by in-memory and on-disk nodes.
//!
//! Keypaths handed to these methods are relative to the node. Writes are
//! inherent methods on the concrete types, since their durability
//! semantics differ (a memory node mutates in place, a db node buffers
//! until `save`).

use crate::encoding::NodeType;
use crate::error::TreeError;
use crate::iter::{ChildIter, DepthFirstIter, TreeIter};
use crate::memory::MemoryNode;
use madrona_model::{Keypath, Range, Value};

pub trait Node {
    /// Materialize the subtree at `kp` as a value, optionally narrowed to
    /// a range (sequence/string splice selection; maps select against the
    /// sorted key view).
    fn value(&self, kp: &Keypath, range: Option<Range>) -> Result<Option<Value>, TreeError>;

    fn exists(&self, kp: &Keypath) -> Result<bool, TreeError>;

    fn node_type(&self, kp: &Keypath) -> Result<Option<NodeType>, TreeError>;

    /// Slice length, string byte length, or map child count.
    fn length(&self, kp: &Keypath) -> Result<u64, TreeError>;

    fn copy_to_memory(&self, kp: &Keypath, range: Option<Range>) -> Result<MemoryNode, TreeError>;

    /// Iterate the subtree rooted at `kp`, root included, in keypath
    /// order (or reverse). `prefetch` is a sizing hint.
    fn iterator(&self, kp: &Keypath, reverse: bool, prefetch: usize) -> Result<TreeIter, TreeError>;

    /// Iterate only the direct children of `kp`.
    fn child_iterator(
        &self,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<ChildIter, TreeError>;

    /// Post-order traversal: descendants before ancestors.
    fn depth_first_iterator(
        &self,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<DepthFirstIter, TreeError>;

    /// Copy the subtree at `kp` into a typed record via its serde
    /// representation.
    fn scan<T: serde::de::DeserializeOwned>(&self, kp: &Keypath) -> Result<T, TreeError>
    where
        Self: Sized,
    {
        let value = self.value(kp, None)?.ok_or(TreeError::NotFound)?;
        serde_json::from_value(value.to_json()).map_err(|e| TreeError::Corrupt(e.to_string()))
    }
}
