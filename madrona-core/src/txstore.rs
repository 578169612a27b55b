//! Persisted transaction log for one state URI.
//!
//! Tables:
//! - txs: admission seq → transaction JSON
//! - tx_index: tx id → admission seq
//! - children: parent id || child id → () (the DAG's downward index)
//! - leaves: tx id → () (txs no persisted tx lists as parent)
//! - checkpoints: tx id → version (catch-up anchors)
//! - meta: "head" → version, "next_seq" → u64 BE

use crate::error::TxStoreError;
use madrona_model::{Transaction, TxId, Version};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashSet;
use std::path::Path;

const TXS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("txs");
const TX_INDEX_TABLE: TableDefinition<&[u8], u64> = TableDefinition::new("tx_index");
const CHILDREN_TABLE: TableDefinition<&[u8], ()> = TableDefinition::new("children");
const LEAVES_TABLE: TableDefinition<&[u8], ()> = TableDefinition::new("leaves");
const CHECKPOINTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("checkpoints");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_HEAD: &str = "head";
const META_NEXT_SEQ: &str = "next_seq";

/// One state URI's persisted transactions and DAG indexes.
pub struct TxStore {
    db: Database,
}

impl std::fmt::Debug for TxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxStore").finish_non_exhaustive()
    }
}

impl TxStore {
    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<TxStore, TxStoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TXS_TABLE)?;
            let _ = write_txn.open_table(TX_INDEX_TABLE)?;
            let _ = write_txn.open_table(CHILDREN_TABLE)?;
            let _ = write_txn.open_table(LEAVES_TABLE)?;
            let _ = write_txn.open_table(CHECKPOINTS_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;
        Ok(TxStore { db })
    }

    /// Persist an admitted transaction and all of its bookkeeping in one
    /// write transaction: the tx itself, the parent→child index, the leaf
    /// set update, the new head, and (for checkpoints) the anchor.
    /// Returns the admission sequence number.
    pub fn record_admission(
        &self,
        tx: &Transaction,
        version: Version,
    ) -> Result<u64, TxStoreError> {
        let encoded = serde_json::to_vec(tx)?;
        let write_txn = self.db.begin_write()?;
        let seq;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            seq = match meta.get(META_NEXT_SEQ)? {
                Some(raw) => {
                    let bytes: [u8; 8] = raw.value().try_into().unwrap_or([0u8; 8]);
                    u64::from_be_bytes(bytes)
                }
                None => 0,
            };
            meta.insert(META_NEXT_SEQ, (seq + 1).to_be_bytes().as_slice())?;
            meta.insert(META_HEAD, version.as_bytes().as_slice())?;

            let mut txs = write_txn.open_table(TXS_TABLE)?;
            txs.insert(seq, encoded.as_slice())?;

            let mut index = write_txn.open_table(TX_INDEX_TABLE)?;
            index.insert(tx.id.as_bytes().as_slice(), seq)?;

            let mut children = write_txn.open_table(CHILDREN_TABLE)?;
            let mut leaves = write_txn.open_table(LEAVES_TABLE)?;
            for parent in &tx.parents {
                let mut edge = Vec::with_capacity(64);
                edge.extend_from_slice(parent.as_bytes());
                edge.extend_from_slice(tx.id.as_bytes());
                children.insert(edge.as_slice(), ())?;
                leaves.remove(parent.as_bytes().as_slice())?;
            }
            leaves.insert(tx.id.as_bytes().as_slice(), ())?;

            if tx.checkpoint {
                let mut checkpoints = write_txn.open_table(CHECKPOINTS_TABLE)?;
                checkpoints.insert(tx.id.as_bytes().as_slice(), version.as_bytes().as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(seq)
    }

    pub fn contains(&self, id: &TxId) -> Result<bool, TxStoreError> {
        Ok(self.seq_of(id)?.is_some())
    }

    pub fn seq_of(&self, id: &TxId) -> Result<Option<u64>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TX_INDEX_TABLE)?;
        Ok(table.get(id.as_bytes().as_slice())?.map(|v| v.value()))
    }

    pub fn get(&self, id: &TxId) -> Result<Option<Transaction>, TxStoreError> {
        let seq = match self.seq_of(id)? {
            Some(seq) => seq,
            None => return Ok(None),
        };
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TXS_TABLE)?;
        match table.get(seq)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// All persisted transactions from `seq` onward, in admission order.
    pub fn txs_from(&self, seq: u64) -> Result<Vec<Transaction>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TXS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.range(seq..)? {
            let (_, raw) = entry?;
            out.push(serde_json::from_slice(raw.value())?);
        }
        Ok(out)
    }

    /// Every persisted transaction in admission order.
    pub fn all(&self) -> Result<Vec<Transaction>, TxStoreError> {
        self.txs_from(0)
    }

    pub fn leaves(&self) -> Result<HashSet<TxId>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEAVES_TABLE)?;
        let mut out = HashSet::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            if let Ok(id) = TxId::try_from(key.value()) {
                out.insert(id);
            }
        }
        Ok(out)
    }

    pub fn children_of(&self, parent: &TxId) -> Result<Vec<TxId>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHILDREN_TABLE)?;
        let mut out = Vec::new();
        for entry in table.range(parent.as_bytes().as_slice()..)? {
            let (key, _) = entry?;
            let key = key.value();
            if !key.starts_with(parent.as_bytes()) {
                break;
            }
            if let Ok(child) = TxId::try_from(&key[32..]) {
                out.push(child);
            }
        }
        Ok(out)
    }

    pub fn head(&self) -> Result<Option<Version>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        Ok(table
            .get(META_HEAD)?
            .and_then(|raw| Version::try_from(raw.value()).ok()))
    }

    pub fn checkpoint_version(&self, id: &TxId) -> Result<Option<Version>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHECKPOINTS_TABLE)?;
        Ok(table
            .get(id.as_bytes().as_slice())?
            .and_then(|raw| Version::try_from(raw.value()).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madrona_model::{NodeIdentity, Patch, TxBuilder};

    fn tx(identity: &NodeIdentity, id: TxId, parents: Vec<TxId>) -> Transaction {
        TxBuilder::new("example.org/demo")
            .id(id)
            .parents(parents)
            .patch(Patch::parse(r#".n = 1"#).unwrap())
            .sign(identity)
            .unwrap()
    }

    #[test]
    fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = TxStore::open(dir.path().join("txs.db")).unwrap();
        let identity = NodeIdentity::generate();

        let a = tx(&identity, TxId([1; 32]), vec![]);
        let b = tx(&identity, TxId([2; 32]), vec![a.id]);

        assert_eq!(store.record_admission(&a, Version::from(a.id)).unwrap(), 0);
        assert_eq!(store.record_admission(&b, Version::from(b.id)).unwrap(), 1);

        assert!(store.contains(&a.id).unwrap());
        assert_eq!(store.get(&b.id).unwrap(), Some(b.clone()));
        assert_eq!(store.all().unwrap(), vec![a.clone(), b.clone()]);
        assert_eq!(store.txs_from(1).unwrap(), vec![b.clone()]);

        // a ceased to be a leaf when b cited it
        assert_eq!(store.leaves().unwrap(), HashSet::from([b.id]));
        assert_eq!(store.children_of(&a.id).unwrap(), vec![b.id]);
        assert_eq!(store.head().unwrap(), Some(Version::from(b.id)));
    }

    #[test]
    fn test_checkpoint_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let store = TxStore::open(dir.path().join("txs.db")).unwrap();
        let identity = NodeIdentity::generate();

        let a = TxBuilder::new("example.org/demo")
            .id(TxId([7; 32]))
            .patch(Patch::parse(r#".n = 1"#).unwrap())
            .checkpoint(true)
            .sign(&identity)
            .unwrap();

        let version = Version::from(a.id);
        store.record_admission(&a, version).unwrap();
        assert_eq!(store.checkpoint_version(&a.id).unwrap(), Some(version));
        assert_eq!(store.checkpoint_version(&TxId([8; 32])).unwrap(), None);
    }
}
