//! Per-state-URI transaction admission and merge.
//!
//! One controller owns one state URI: its versioned tree, its persisted
//! transaction log, the leaf set, and the buffer of transactions waiting
//! for missing parents. Admission is serialized by the owning actor; this
//! type itself is synchronous.

use crate::error::{ControllerError, ValidatorError};
use crate::registries::Registries;
use crate::txstore::TxStore;
use madrona_model::{Keypath, Transaction, TxId, Value, Version};
use madrona_tree::{DbNode, Node, VersionedTree};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Reserved child key configuring a subtree's resolver.
pub const MERGE_TYPE_KEY: &[u8] = b"Merge-Type";
/// Reserved child key configuring a subtree's validator.
pub const VALIDATOR_KEY: &[u8] = b"Validator";
/// Key naming the registered handler inside either reserved node.
pub const CONTENT_TYPE_KEY: &str = "Content-Type";
/// Key holding the handler's config inside either reserved node.
pub const CONFIG_KEY: &str = "value";

/// Outcome of submitting one transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum AdmitOutcome {
    /// Applied; the new head version.
    Admitted { version: Version },
    /// Already persisted; nothing happened.
    Duplicate,
    /// Parked until the named parents arrive.
    Parked { missing: Vec<TxId> },
}

/// One transaction that became head during an admission (the submitted tx
/// or a parked descendant it woke).
#[derive(Clone, Debug)]
pub struct AdmittedTx {
    pub tx: Transaction,
    pub version: Version,
}

pub struct Controller {
    state_uri: String,
    tree: VersionedTree,
    txstore: TxStore,
    registries: Registries,
    head: Option<Version>,
    leaves: HashSet<TxId>,
    // missing parent id -> txs waiting on it
    parked: HashMap<TxId, Vec<Transaction>>,
    parked_ids: HashSet<TxId>,
}

impl Controller {
    /// Open (or create) the controller state for one URI under `dir`.
    pub fn open(
        state_uri: impl Into<String>,
        dir: impl AsRef<Path>,
        registries: Registries,
    ) -> Result<Controller, ControllerError> {
        let dir = dir.as_ref();
        let tree = VersionedTree::open(dir.join("state.db"))?;
        let txstore = TxStore::open(dir.join("txs.db"))?;
        let head = txstore.head()?;
        let leaves = txstore.leaves()?;
        Ok(Controller {
            state_uri: state_uri.into(),
            tree,
            txstore,
            registries,
            head,
            leaves,
            parked: HashMap::new(),
            parked_ids: HashSet::new(),
        })
    }

    pub fn state_uri(&self) -> &str {
        &self.state_uri
    }

    pub fn head(&self) -> Option<Version> {
        self.head
    }

    pub fn leaves(&self) -> &HashSet<TxId> {
        &self.leaves
    }

    pub fn txstore(&self) -> &TxStore {
        &self.txstore
    }

    /// The head subtree under `kp`, or `None` before any admission.
    pub fn head_value(&self, kp: &Keypath) -> Result<Option<Value>, ControllerError> {
        let head = match self.head {
            Some(head) => head,
            None => return Ok(None),
        };
        let state = self.tree.state_at(head, false)?;
        Ok(state.value(kp, None)?)
    }

    /// The subtree under `kp` at a specific version.
    pub fn value_at(&self, version: Version, kp: &Keypath) -> Result<Option<Value>, ControllerError> {
        let state = self.tree.state_at(version, false)?;
        Ok(state.value(kp, None)?)
    }

    pub fn checkpoint_version(&self, id: &TxId) -> Result<Option<Version>, ControllerError> {
        Ok(self.txstore.checkpoint_version(id)?)
    }

    /// Admit one transaction. Returns its outcome plus every transaction
    /// that became head as a result, in admission order (the tx itself
    /// and any parked descendants it woke).
    pub fn admit(
        &mut self,
        tx: Transaction,
    ) -> Result<(AdmitOutcome, Vec<AdmittedTx>), ControllerError> {
        tx.verify().map_err(|e| {
            warn!(state_uri = %self.state_uri, id = %tx.id, error = %e, "dropping transaction with bad signature");
            ControllerError::BadSignature
        })?;

        let mut admitted = Vec::new();
        let outcome = self.admit_verified(tx, &mut admitted)?;
        Ok((outcome, admitted))
    }

    fn admit_verified(
        &mut self,
        tx: Transaction,
        admitted: &mut Vec<AdmittedTx>,
    ) -> Result<AdmitOutcome, ControllerError> {
        if self.txstore.contains(&tx.id)? {
            debug!(state_uri = %self.state_uri, id = %tx.id, "duplicate transaction");
            return Ok(AdmitOutcome::Duplicate);
        }

        let mut missing = Vec::new();
        for parent in &tx.parents {
            if !self.txstore.contains(parent)? {
                missing.push(*parent);
            }
        }
        if !missing.is_empty() {
            if self.parked_ids.insert(tx.id) {
                debug!(
                    state_uri = %self.state_uri,
                    id = %tx.id,
                    missing = missing.len(),
                    "parking transaction until parents arrive"
                );
                for parent in &missing {
                    self.parked.entry(*parent).or_default().push(tx.clone());
                }
            }
            return Ok(AdmitOutcome::Parked { missing });
        }

        let version = self.apply(&tx)?;

        self.txstore.record_admission(&tx, version)?;
        for parent in &tx.parents {
            self.leaves.remove(parent);
        }
        self.leaves.insert(tx.id);
        self.head = Some(version);
        debug!(state_uri = %self.state_uri, id = %tx.id, version = %version, "admitted transaction");
        admitted.push(AdmittedTx {
            tx: tx.clone(),
            version,
        });

        // wake parked descendants; each re-checks its remaining parents
        if let Some(waiting) = self.parked.remove(&tx.id) {
            for parked_tx in waiting {
                self.parked_ids.remove(&parked_tx.id);
                self.admit_verified(parked_tx, admitted)?;
            }
        }

        Ok(AdmitOutcome::Admitted { version })
    }

    // Produce the new head version for `tx`, either by extending the
    // current head or, when the tx is concurrent with other leaves, by a
    // canonical replay of the whole DAG so that every peer converges on
    // the same state regardless of arrival order.
    fn apply(&mut self, tx: &Transaction) -> Result<Version, ControllerError> {
        let parents: HashSet<TxId> = tx.parents.iter().copied().collect();
        let extends_all_leaves = parents == self.leaves;
        let version = Version::from(tx.id);

        if extends_all_leaves {
            if let Some(head) = self.head {
                self.tree.copy_version(version, head)?;
            }
            let mut state = self.tree.state_at(version, true)?;
            match apply_patches(&self.registries, &mut state, tx) {
                Ok(()) => {
                    state.save()?;
                    state.close();
                    Ok(version)
                }
                Err(e) => {
                    state.close();
                    self.tree.delete_version(version)?;
                    Err(e)
                }
            }
        } else {
            self.replay_with(tx, version)
        }
    }

    // Full deterministic replay: every persisted tx plus `tx`, in
    // topological order with ties broken by tx id, folded into one fresh
    // version.
    fn replay_with(&mut self, tx: &Transaction, version: Version) -> Result<Version, ControllerError> {
        let mut txs = self.txstore.all()?;
        txs.push(tx.clone());
        let order = canonical_order(&txs);

        let mut state = self.tree.state_at(version, true)?;
        for replayed in &order {
            let strict = replayed.id == tx.id;
            match apply_patches(&self.registries, &mut state, replayed) {
                Ok(()) => {}
                Err(e) if strict => {
                    state.close();
                    self.tree.delete_version(version)?;
                    return Err(e);
                }
                Err(e) => {
                    // a previously admitted tx can fail under the new
                    // canonical order; it stays in the log but contributes
                    // nothing
                    warn!(
                        state_uri = %self.state_uri,
                        id = %replayed.id,
                        error = %e,
                        "replayed transaction no longer applies"
                    );
                }
            }
        }
        state.save()?;
        state.close();
        Ok(version)
    }

    /// Drop any parked transactions (e.g. on shutdown). Returns how many
    /// were discarded.
    pub fn clear_parked(&mut self) -> usize {
        let count = self.parked_ids.len();
        self.parked.clear();
        self.parked_ids.clear();
        count
    }
}

/// Deterministic topological order over a set of transactions: Kahn's
/// algorithm with the ready set ordered by tx id. Parents outside the set
/// are treated as satisfied.
pub fn canonical_order(txs: &[Transaction]) -> Vec<Transaction> {
    let by_id: HashMap<TxId, &Transaction> = txs.iter().map(|tx| (tx.id, tx)).collect();
    let mut pending: HashMap<TxId, usize> = HashMap::new();
    let mut children: HashMap<TxId, Vec<TxId>> = HashMap::new();
    for tx in txs {
        let in_set = tx
            .parents
            .iter()
            .filter(|p| by_id.contains_key(p))
            .count();
        pending.insert(tx.id, in_set);
        for parent in &tx.parents {
            if by_id.contains_key(parent) {
                children.entry(*parent).or_default().push(tx.id);
            }
        }
    }

    let mut ready: BTreeSet<TxId> = pending
        .iter()
        .filter(|(_, &n)| n == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(txs.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(by_id[&next].clone());
        if let Some(kids) = children.get(&next) {
            for kid in kids {
                let n = pending.get_mut(kid).expect("child tracked");
                *n -= 1;
                if *n == 0 {
                    ready.insert(*kid);
                }
            }
        }
    }
    order
}

// Apply every patch of `tx` to `state` in declaration order, running the
// innermost validator first and then the innermost resolver for each.
fn apply_patches(
    registries: &Registries,
    state: &mut DbNode<'_>,
    tx: &Transaction,
) -> Result<(), ControllerError> {
    for patch in &tx.patches {
        let kp = patch.keypath();

        if let Some((depth, validator)) = find_validator(registries, state, &kp)? {
            let relative = patch.relative_to_depth(depth);
            validator
                .validate(&tx.from, &relative)
                .map_err(|e: ValidatorError| {
                    debug!(id = %tx.id, error = %e, "validator rejected transaction");
                    ControllerError::Validator(e)
                })?;
        }

        let (root, resolver) = find_resolver(registries, state, &kp)?;
        let relative = patch.relative_to_depth(root.num_parts());
        let current = state.value(&root, None)?;
        let next = resolver.resolve(current, &relative)?;
        state.set(&root, None, &next)?;
    }
    Ok(())
}

// Read the Content-Type and config of a reserved node (`Merge-Type` or
// `Validator`) under `kp`, if present.
fn reserved_node(
    state: &DbNode<'_>,
    kp: &Keypath,
    key: &[u8],
) -> Result<Option<(String, Value)>, ControllerError> {
    let node = match state.value(&kp.push(key), None)? {
        Some(node) => node,
        None => return Ok(None),
    };
    let content_type = match node.get(CONTENT_TYPE_KEY).and_then(Value::as_str) {
        Some(ct) => ct.to_string(),
        None => return Ok(None),
    };
    let config = node.get(CONFIG_KEY).cloned().unwrap_or(Value::Null);
    Ok(Some((content_type, config)))
}

// The innermost configured resolver at or above `kp`, defaulting to the
// dumb resolver at the root.
fn find_resolver(
    registries: &Registries,
    state: &DbNode<'_>,
    kp: &Keypath,
) -> Result<(Keypath, Box<dyn crate::resolver::Resolver>), ControllerError> {
    for anc in kp.ancestors_including_self() {
        if let Some((content_type, config)) = reserved_node(state, &anc, MERGE_TYPE_KEY)? {
            let factory = registries
                .resolvers
                .get(&content_type)
                .ok_or(ControllerError::UnknownContentType(content_type))?;
            return Ok((anc, factory.make(&config)?));
        }
    }
    Ok((Keypath::root(), Box::new(crate::resolver::DumbResolver)))
}

// The innermost configured validator at or above `kp`, with the depth of
// the subtree it governs.
fn find_validator(
    registries: &Registries,
    state: &DbNode<'_>,
    kp: &Keypath,
) -> Result<Option<(usize, Box<dyn crate::validator::Validator>)>, ControllerError> {
    for anc in kp.ancestors_including_self() {
        if let Some((content_type, config)) = reserved_node(state, &anc, VALIDATOR_KEY)? {
            let factory = registries
                .validators
                .get(&content_type)
                .ok_or(ControllerError::UnknownContentType(content_type))?;
            return Ok(Some((anc.num_parts(), factory.make(&config)?)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use madrona_model::{NodeIdentity, Patch, TxBuilder};

    #[test]
    fn test_canonical_order_respects_parents_and_ids() {
        let identity = NodeIdentity::generate();
        let mk = |id: u8, parents: Vec<TxId>| {
            TxBuilder::new("example.org/demo")
                .id(TxId([id; 32]))
                .parents(parents)
                .patch(Patch::parse(".n = 1").unwrap())
                .sign(&identity)
                .unwrap()
        };

        let a = mk(1, vec![]);
        let b = mk(9, vec![a.id]);
        let c = mk(2, vec![a.id]);
        let d = mk(5, vec![b.id, c.id]);

        // same order regardless of the input permutation
        let expected: Vec<TxId> = vec![a.id, c.id, b.id, d.id];
        for perm in [
            vec![a.clone(), b.clone(), c.clone(), d.clone()],
            vec![d.clone(), c.clone(), b.clone(), a.clone()],
            vec![b.clone(), d.clone(), a.clone(), c.clone()],
        ] {
            let order: Vec<TxId> = canonical_order(&perm).iter().map(|tx| tx.id).collect();
            assert_eq!(order, expected);
        }
    }
}
