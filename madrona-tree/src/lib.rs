//! Keypath-addressed versioned state tree.
//!
//! Heterogeneous values (maps, ordered sequences, scalars, opaque bytes)
//! stored under hierarchical byte-path keys in an embedded ordered KV
//! store, with ranged reads and writes, subtree iteration in several
//! orders, snapshot versions, and cheap version forking.

pub mod db;
pub mod encoding;
pub mod error;
pub mod iter;
pub mod memory;
pub mod node;
mod ops;

pub use db::{DbNode, VersionedTree};
pub use encoding::{NodeType, ValueKind};
pub use error::TreeError;
pub use iter::{ChildIter, DepthFirstIter, IterNode, NestedIter, TreeIter};
pub use memory::MemoryNode;
pub use node::Node;
