//! Signed transactions: the unit of replication.
//!
//! A transaction names its state URI, its parent transactions (forming a
//! DAG per URI), and an ordered list of patches. The signature covers a
//! canonical JSON payload of everything except the signature itself; the
//! sender address must match the signing key.

use crate::identity::NodeIdentity;
use crate::patch::Patch;
use crate::types::{Address, PubKey, Signature, TxId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("bad signature")]
    BadSignature,

    #[error("sender address does not match signing key")]
    AddressMismatch,

    #[error("transaction encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A signed, causally-ordered bundle of patches against one state URI.
///
/// Wire form is JSON with all fixed-size ids as lowercase hex and patches
/// as strings in the textual grammar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub parents: Vec<TxId>,
    pub from: Address,
    #[serde(rename = "stateURI")]
    pub state_uri: String,
    pub patches: Vec<Patch>,
    pub pubkey: PubKey,
    pub sig: Signature,
    #[serde(default)]
    pub checkpoint: bool,
}

// Canonical signing payload: every field but the signature, patches in
// their textual form.
#[derive(Serialize)]
struct SigningView<'a> {
    id: &'a TxId,
    parents: &'a [TxId],
    from: &'a Address,
    #[serde(rename = "stateURI")]
    state_uri: &'a str,
    patches: Vec<String>,
    checkpoint: bool,
}

fn signing_payload(
    id: &TxId,
    parents: &[TxId],
    from: &Address,
    state_uri: &str,
    patches: &[Patch],
    checkpoint: bool,
) -> Result<Vec<u8>, TxError> {
    let view = SigningView {
        id,
        parents,
        from,
        state_uri,
        patches: patches.iter().map(|p| p.to_string()).collect(),
        checkpoint,
    };
    Ok(serde_json::to_vec(&view)?)
}

impl Transaction {
    /// True for the fixed all-zero genesis id.
    pub fn is_genesis(&self) -> bool {
        self.id == TxId::GENESIS
    }

    /// Verify the signature over the canonical payload and the binding of
    /// the sender address to the signing key.
    pub fn verify(&self) -> Result<(), TxError> {
        if Address::from_pubkey(&self.pubkey) != self.from {
            return Err(TxError::AddressMismatch);
        }
        let payload = signing_payload(
            &self.id,
            &self.parents,
            &self.from,
            &self.state_uri,
            &self.patches,
            self.checkpoint,
        )?;
        NodeIdentity::verify_with_key(&self.pubkey, &payload, &self.sig)
            .map_err(|_| TxError::BadSignature)
    }

    pub fn to_json(&self) -> Result<String, TxError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Transaction, TxError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builder for a transaction, finalized by signing.
pub struct TxBuilder {
    id: TxId,
    parents: Vec<TxId>,
    state_uri: String,
    patches: Vec<Patch>,
    checkpoint: bool,
}

impl TxBuilder {
    pub fn new(state_uri: impl Into<String>) -> TxBuilder {
        TxBuilder {
            id: TxId::random(),
            parents: Vec::new(),
            state_uri: state_uri.into(),
            patches: Vec::new(),
            checkpoint: false,
        }
    }

    /// Use the fixed genesis id (and no parents).
    pub fn genesis(mut self) -> TxBuilder {
        self.id = TxId::GENESIS;
        self.parents.clear();
        self
    }

    pub fn id(mut self, id: TxId) -> TxBuilder {
        self.id = id;
        self
    }

    pub fn parents(mut self, parents: Vec<TxId>) -> TxBuilder {
        self.parents = parents;
        self
    }

    pub fn parent(mut self, parent: TxId) -> TxBuilder {
        self.parents.push(parent);
        self
    }

    pub fn patch(mut self, patch: Patch) -> TxBuilder {
        self.patches.push(patch);
        self
    }

    pub fn patches(mut self, patches: Vec<Patch>) -> TxBuilder {
        self.patches = patches;
        self
    }

    pub fn checkpoint(mut self, checkpoint: bool) -> TxBuilder {
        self.checkpoint = checkpoint;
        self
    }

    /// Sign with the given identity, producing the finished transaction.
    pub fn sign(self, identity: &NodeIdentity) -> Result<Transaction, TxError> {
        let from = identity.address();
        let payload = signing_payload(
            &self.id,
            &self.parents,
            &from,
            &self.state_uri,
            &self.patches,
            self.checkpoint,
        )?;
        Ok(Transaction {
            id: self.id,
            parents: self.parents,
            from,
            state_uri: self.state_uri,
            patches: self.patches,
            pubkey: identity.public_key(),
            sig: identity.sign(&payload),
            checkpoint: self.checkpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(identity: &NodeIdentity) -> Transaction {
        TxBuilder::new("example.org/demo")
            .genesis()
            .patch(Patch::parse(r#" = {"hello": {"xyzzy": 33}}"#).unwrap())
            .sign(identity)
            .unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = NodeIdentity::generate();
        let tx = sample_tx(&identity);
        assert!(tx.is_genesis());
        tx.verify().unwrap();
    }

    #[test]
    fn test_tampered_patch_fails_verification() {
        let identity = NodeIdentity::generate();
        let mut tx = sample_tx(&identity);
        tx.patches = vec![Patch::parse(r#".hello.xyzzy = 34"#).unwrap()];
        assert!(matches!(tx.verify(), Err(TxError::BadSignature)));
    }

    #[test]
    fn test_forged_sender_fails_verification() {
        let identity = NodeIdentity::generate();
        let other = NodeIdentity::generate();
        let mut tx = sample_tx(&identity);
        tx.from = other.address();
        assert!(matches!(tx.verify(), Err(TxError::AddressMismatch)));
    }

    #[test]
    fn test_json_wire_form() {
        let identity = NodeIdentity::generate();
        let tx = TxBuilder::new("example.org/demo")
            .id(TxId([0x2d; 32]))
            .parent(TxId::GENESIS)
            .patch(Patch::parse(r#".refs.heads.master = {"HEAD": "2d2d"}"#).unwrap())
            .checkpoint(true)
            .sign(&identity)
            .unwrap();

        let json = tx.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["id"], serde_json::json!("2d".repeat(32)));
        assert_eq!(parsed["stateURI"], serde_json::json!("example.org/demo"));
        assert_eq!(parsed["checkpoint"], serde_json::json!(true));
        assert!(parsed["patches"][0].is_string());

        let back = Transaction::from_json(&json).unwrap();
        assert_eq!(back, tx);
        back.verify().unwrap();
    }
}
