//! On-disk versioned tree backed by redb.
//!
//! Every logical key is stored as `version(32) || ':' || keypath`, so all
//! keys of one version form a single contiguous range: version forks are
//! range copies and version drops are range deletes. A writable node
//! buffers its writes in an overlay and commits them in one write
//! transaction on `save`; reads on a writable node see the overlay merged
//! over the committed state.

use crate::error::TreeError;
use crate::iter::{self, ChildIter, DepthFirstIter, TreeIter};
use crate::memory::{self, MemoryNode};
use crate::node::Node;
use crate::ops::{self, RawRead, RawWrite, Snapshot};
use madrona_model::{Keypath, Range, Value, Version};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

const STATE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("state");

const VERSION_SEPARATOR: u8 = b':';

fn physical_key(version: &Version, logical: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(33 + logical.len());
    out.extend_from_slice(version.as_bytes());
    out.push(VERSION_SEPARATOR);
    out.extend_from_slice(logical);
    out
}

/// A versioned state tree in one redb database.
pub struct VersionedTree {
    db: Database,
    // one writer per version at a time
    write_locks: Mutex<HashSet<Version>>,
}

impl std::fmt::Debug for VersionedTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedTree").finish_non_exhaustive()
    }
}

impl VersionedTree {
    /// Open or create the tree database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<VersionedTree, TreeError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(STATE_TABLE)?;
        }
        write_txn.commit()?;
        Ok(VersionedTree {
            db,
            write_locks: Mutex::new(HashSet::new()),
        })
    }

    /// A node over one version's state. At most one writable node per
    /// version may be live at a time.
    pub fn state_at(&self, version: Version, writable: bool) -> Result<DbNode<'_>, TreeError> {
        if writable {
            if let Ok(mut locks) = self.write_locks.lock() {
                if !locks.insert(version) {
                    return Err(TreeError::WriteConflict(version));
                }
            }
        }
        Ok(DbNode {
            tree: self,
            version,
            frame: Keypath::root(),
            writable,
            closed: false,
            overlay: BTreeMap::new(),
        })
    }

    /// Copy every key of `src` under `dst`. Copy-on-write is at version
    /// granularity only; there is no structural sharing on disk.
    pub fn copy_version(&self, dst: Version, src: Version) -> Result<(), TreeError> {
        let entries = self.scan_version(&src, &Keypath::root())?;
        tracing::debug!(src = %src, dst = %dst, entries = entries.len(), "forking version");
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            for (logical, entry) in &entries {
                table.insert(physical_key(&dst, logical).as_slice(), entry.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Range-delete every key of a version.
    pub fn delete_version(&self, version: Version) -> Result<(), TreeError> {
        let keys: Vec<Vec<u8>> = self
            .scan_version(&version, &Keypath::root())?
            .into_keys()
            .map(|logical| physical_key(&version, &logical))
            .collect();
        tracing::debug!(version = %version, entries = keys.len(), "dropping version");
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            for key in keys {
                table.remove(key.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Total number of physical KV entries, across all versions.
    pub fn entry_count(&self) -> Result<u64, TreeError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;
        let mut count = 0u64;
        for entry in table.iter()? {
            let _ = entry?;
            count += 1;
        }
        Ok(count)
    }

    fn get_one(&self, version: &Version, logical: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;
        let key = physical_key(version, logical);
        Ok(table.get(key.as_slice())?.map(|v| v.value().to_vec()))
    }

    // Part-aligned subtree scan of one version, returned with logical keys.
    fn scan_version(&self, version: &Version, prefix: &Keypath) -> Result<Snapshot, TreeError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;
        let start = physical_key(version, prefix.as_bytes());
        let version_prefix = physical_key(version, &[]);
        let mut out = Snapshot::new();
        for entry in table.range(start.as_slice()..)? {
            let (key, value) = entry?;
            let key_bytes = key.value();
            if !key_bytes.starts_with(&version_prefix) {
                break;
            }
            let logical = &key_bytes[version_prefix.len()..];
            if !logical.starts_with(prefix.as_bytes()) {
                break;
            }
            if ops::in_subtree(prefix.as_bytes(), logical) {
                out.insert(logical.to_vec(), value.value().to_vec());
            }
        }
        Ok(out)
    }

    fn release_write_lock(&self, version: &Version) {
        if let Ok(mut locks) = self.write_locks.lock() {
            locks.remove(version);
        }
    }
}

/// A read-only or writable view of one version of a [`VersionedTree`].
pub struct DbNode<'t> {
    tree: &'t VersionedTree,
    version: Version,
    frame: Keypath,
    writable: bool,
    closed: bool,
    // logical key -> pending write (None = pending delete)
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'t> DbNode<'t> {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// A read view rooted deeper in the same version. Pending writes on
    /// this node are visible to the view; the view itself cannot write.
    pub fn node_at(&self, kp: &Keypath) -> DbNode<'t> {
        DbNode {
            tree: self.tree,
            version: self.version,
            frame: self.frame.join(kp),
            writable: false,
            closed: self.closed,
            overlay: self.overlay.clone(),
        }
    }

    pub fn set(&mut self, kp: &Keypath, range: Option<Range>, value: &Value) -> Result<(), TreeError> {
        self.check_writable()?;
        let abs = self.frame.join(kp);
        ops::set(self, &abs, range, value)
    }

    pub fn delete(&mut self, kp: &Keypath, range: Option<Range>) -> Result<(), TreeError> {
        self.check_writable()?;
        let abs = self.frame.join(kp);
        ops::delete(self, &abs, range)
    }

    /// Commit buffered writes in a single write transaction.
    pub fn save(&mut self) -> Result<(), TreeError> {
        self.check_writable()?;
        if self.overlay.is_empty() {
            return Ok(());
        }
        let write_txn = self.tree.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            for (logical, pending) in &self.overlay {
                let key = physical_key(&self.version, logical);
                match pending {
                    Some(entry) => {
                        table.insert(key.as_slice(), entry.as_slice())?;
                    }
                    None => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        self.overlay.clear();
        Ok(())
    }

    /// Discard buffered writes and release the node.
    pub fn close(&mut self) {
        self.overlay.clear();
        if self.writable && !self.closed {
            self.tree.release_write_lock(&self.version);
        }
        self.closed = true;
    }

    fn check_open(&self) -> Result<(), TreeError> {
        if self.closed {
            return Err(TreeError::Closed);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), TreeError> {
        self.check_open()?;
        if !self.writable {
            return Err(TreeError::ReadOnly);
        }
        Ok(())
    }

    // Full logical keypath for a key of a memory node being saved at `at`.
    pub(crate) fn absolute(&self, key: &Keypath, at: &Keypath) -> Keypath {
        self.frame.join(at).join(key)
    }
}

impl Drop for DbNode<'_> {
    fn drop(&mut self) {
        if self.writable && !self.closed {
            self.tree.release_write_lock(&self.version);
        }
    }
}

impl RawRead for DbNode<'_> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        self.check_open()?;
        if let Some(pending) = self.overlay.get(key) {
            return Ok(pending.clone());
        }
        self.tree.get_one(&self.version, key)
    }

    fn subtree_raw(&self, prefix: &Keypath) -> Result<Snapshot, TreeError> {
        self.check_open()?;
        let mut snap = self.tree.scan_version(&self.version, prefix)?;
        for (key, pending) in self.overlay.range(prefix.as_bytes().to_vec()..) {
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            if !ops::in_subtree(prefix.as_bytes(), key) {
                continue;
            }
            match pending {
                Some(entry) => {
                    snap.insert(key.clone(), entry.clone());
                }
                None => {
                    snap.remove(key);
                }
            }
        }
        Ok(snap)
    }
}

impl RawWrite for DbNode<'_> {
    fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), TreeError> {
        self.overlay.insert(key, Some(value));
        Ok(())
    }

    fn del_raw(&mut self, key: &[u8]) -> Result<(), TreeError> {
        self.overlay.insert(key.to_vec(), None);
        Ok(())
    }
}

impl Node for DbNode<'_> {
    fn value(&self, kp: &Keypath, range: Option<Range>) -> Result<Option<Value>, TreeError> {
        let abs = self.frame.join(kp);
        ops::value(self, &abs, range)
    }

    fn exists(&self, kp: &Keypath) -> Result<bool, TreeError> {
        let abs = self.frame.join(kp);
        ops::exists(self, &abs)
    }

    fn node_type(&self, kp: &Keypath) -> Result<Option<crate::encoding::NodeType>, TreeError> {
        let abs = self.frame.join(kp);
        ops::node_type_of(self, &abs)
    }

    fn length(&self, kp: &Keypath) -> Result<u64, TreeError> {
        let abs = self.frame.join(kp);
        ops::length(self, &abs)
    }

    fn copy_to_memory(&self, kp: &Keypath, range: Option<Range>) -> Result<MemoryNode, TreeError> {
        let abs = self.frame.join(kp);
        memory::copy_to_memory(self, &abs, range)
    }

    fn iterator(&self, kp: &Keypath, reverse: bool, prefetch: usize) -> Result<TreeIter, TreeError> {
        iter::tree_iter(self, &self.frame, kp, reverse, prefetch)
    }

    fn child_iterator(
        &self,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<ChildIter, TreeError> {
        ChildIter::over(self, &self.frame, kp, reverse, prefetch)
    }

    fn depth_first_iterator(
        &self,
        kp: &Keypath,
        reverse: bool,
        prefetch: usize,
    ) -> Result<DepthFirstIter, TreeError> {
        DepthFirstIter::over(self, &self.frame, kp, reverse, prefetch)
    }
}
