//! Shared base types for the madrona replicated state tree.
//!
//! Everything here is plain data: fixed-size id newtypes, the node
//! identity (Ed25519 keypair), the JSON-like value AST, keypaths, patches
//! and their textual grammar, and signed transactions. The storage and
//! replication machinery lives in the crates above this one.

pub mod identity;
pub mod keypath;
pub mod patch;
pub mod tx;
pub mod types;
pub mod value;

pub use identity::{IdentityError, NodeIdentity};
pub use keypath::{Keypath, INDEX_SEPARATOR, KEYPATH_SEPARATOR};
pub use patch::{Patch, PatchError, Range};
pub use tx::{Transaction, TxBuilder, TxError};
pub use types::{Address, PubKey, RefHash, Signature, TxId, Version};
pub use value::Value;
