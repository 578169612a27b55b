//! Controller admission tests: the git-demo genesis/commit flow, parent
//! buffering, permission enforcement, and replay determinism.

use madrona_core::{AdmitOutcome, Controller, ControllerError, Registries};
use madrona_model::{Keypath, NodeIdentity, Patch, Transaction, TxBuilder, TxId, Value, Version};

const STATE_URI: &str = "somegitprovider.org/gitdemo";
const COMMIT1: &str = "2d4518de34a9583d61b32c9bf3b4cf0bdc1c8734";

fn open_controller(dir: &tempfile::TempDir) -> Controller {
    Controller::open(STATE_URI, dir.path(), Registries::standard()).unwrap()
}

fn genesis_tx(owner: &NodeIdentity) -> Transaction {
    let patch = format!(
        r#" = {{
            "demo": {{
                "Content-Type": "link",
                "value": "state:somegitprovider.org/gitdemo/refs/heads/master/worktree"
            }},
            "Merge-Type": {{
                "Content-Type": "resolver/dumb",
                "value": {{}}
            }},
            "Validator": {{
                "Content-Type": "validator/permissions",
                "value": {{
                    "{owner}": {{
                        "^.*$": {{ "write": true }}
                    }},
                    "*": {{
                        "^\\.refs\\..*": {{ "write": true }},
                        "^\\.commits\\.[a-f0-9]+\\.parents": {{ "write": true }},
                        "^\\.commits\\.[a-f0-9]+\\.message": {{ "write": true }},
                        "^\\.commits\\.[a-f0-9]+\\.timestamp": {{ "write": true }},
                        "^\\.commits\\.[a-f0-9]+\\.author": {{ "write": true }},
                        "^\\.commits\\.[a-f0-9]+\\.committer": {{ "write": true }},
                        "^\\.commits\\.[a-f0-9]+\\.files": {{ "write": true }}
                    }}
                }}
            }},
            "refs": {{ "heads": {{}} }},
            "commits": {{}}
        }}"#,
        owner = owner.address()
    );
    TxBuilder::new(STATE_URI)
        .genesis()
        .patch(Patch::parse(&patch).unwrap())
        .sign(owner)
        .unwrap()
}

fn commit_tx(owner: &NodeIdentity, parents: Vec<TxId>) -> Transaction {
    let commit_patch = format!(
        r#".commits.{COMMIT1} = {{
            "message": "First commit\n",
            "timestamp": "2020-05-26T16:42:24-05:00",
            "files": {{
                "README.md": {{
                    "Content-Type": "link",
                    "mode": 33188,
                    "value": "ref:deadbeef"
                }}
            }}
        }}"#
    );
    let refs_patch = format!(
        r#".refs.heads.master = {{
            "HEAD": "{COMMIT1}",
            "worktree": {{
                "Content-Type": "link",
                "value": "state:somegitprovider.org/gitdemo/commits/{COMMIT1}/files"
            }}
        }}"#
    );
    TxBuilder::new(STATE_URI)
        .id(TxId::from_hex(&format!("{COMMIT1}{}", "0".repeat(24))).unwrap())
        .parents(parents)
        .patch(Patch::parse(&commit_patch).unwrap())
        .patch(Patch::parse(&refs_patch).unwrap())
        .checkpoint(true)
        .sign(owner)
        .unwrap()
}

#[test]
fn test_genesis_then_commit() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = open_controller(&dir);
    let owner = NodeIdentity::generate();

    let genesis = genesis_tx(&owner);
    let (outcome, admitted) = controller.admit(genesis.clone()).unwrap();
    assert!(matches!(outcome, AdmitOutcome::Admitted { .. }));
    assert_eq!(admitted.len(), 1);

    let commit = commit_tx(&owner, vec![genesis.id]);
    let (outcome, _) = controller.admit(commit.clone()).unwrap();
    let version = match outcome {
        AdmitOutcome::Admitted { version } => version,
        other => panic!("expected admission, got {:?}", other),
    };

    // the commit became head and the refs patch is readable
    assert_eq!(controller.head(), Some(version));
    let head_ref = controller
        .head_value(&Keypath::from("refs/heads/master/HEAD"))
        .unwrap();
    assert_eq!(head_ref, Some(Value::Str(COMMIT1.into())));
    let message = controller
        .head_value(&Keypath::new(format!("commits/{COMMIT1}/message")))
        .unwrap();
    assert_eq!(message, Some(Value::Str("First commit\n".into())));

    // genesis stopped being a leaf; the commit is one
    assert!(!controller.leaves().contains(&genesis.id));
    assert!(controller.leaves().contains(&commit.id));

    // the checkpoint recorded its version as an anchor
    assert_eq!(
        controller.checkpoint_version(&commit.id).unwrap(),
        Some(version)
    );
}

#[test]
fn test_duplicate_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = open_controller(&dir);
    let owner = NodeIdentity::generate();

    let genesis = genesis_tx(&owner);
    controller.admit(genesis.clone()).unwrap();
    let head = controller.head();

    let (outcome, admitted) = controller.admit(genesis).unwrap();
    assert_eq!(outcome, AdmitOutcome::Duplicate);
    assert!(admitted.is_empty());
    assert_eq!(controller.head(), head);
}

#[test]
fn test_bad_signature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = open_controller(&dir);
    let owner = NodeIdentity::generate();

    let mut forged = genesis_tx(&owner);
    forged.patches = vec![Patch::parse(r#" = {"evil": true}"#).unwrap()];

    assert!(matches!(
        controller.admit(forged),
        Err(ControllerError::BadSignature)
    ));
    assert_eq!(controller.head(), None);
}

#[test]
fn test_child_before_parent_is_parked() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = open_controller(&dir);
    let owner = NodeIdentity::generate();

    let genesis = genesis_tx(&owner);
    let commit = commit_tx(&owner, vec![genesis.id]);

    // child first: parked, no state
    let (outcome, admitted) = controller.admit(commit.clone()).unwrap();
    assert_eq!(
        outcome,
        AdmitOutcome::Parked {
            missing: vec![genesis.id]
        }
    );
    assert!(admitted.is_empty());
    assert_eq!(controller.head(), None);

    // parent arrives: both are admitted, in order, and head is the child
    let (outcome, admitted) = controller.admit(genesis.clone()).unwrap();
    assert!(matches!(outcome, AdmitOutcome::Admitted { .. }));
    let ids: Vec<TxId> = admitted.iter().map(|a| a.tx.id).collect();
    assert_eq!(ids, vec![genesis.id, commit.id]);
    assert_eq!(controller.head(), Some(Version::from(commit.id)));
}

#[test]
fn test_permission_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = open_controller(&dir);
    let owner = NodeIdentity::generate();
    let stranger = NodeIdentity::generate();

    let genesis = genesis_tx(&owner);
    controller.admit(genesis.clone()).unwrap();

    // a stranger may write a commit message
    let allowed = TxBuilder::new(STATE_URI)
        .parent(genesis.id)
        .patch(Patch::parse(r#".commits.deadbeef.message = "hello""#).unwrap())
        .sign(&stranger)
        .unwrap();
    let (outcome, _) = controller.admit(allowed.clone()).unwrap();
    assert!(matches!(outcome, AdmitOutcome::Admitted { .. }));

    // but not the demo link
    let forbidden = TxBuilder::new(STATE_URI)
        .parent(allowed.id)
        .patch(Patch::parse(r#".demo.value = "state:evil""#).unwrap())
        .sign(&stranger)
        .unwrap();
    let head_before = controller.head();
    let result = controller.admit(forbidden.clone());
    assert!(matches!(
        result,
        Err(ControllerError::Validator(_))
    ));

    // nothing was persisted: no head change, no tx, no version
    assert_eq!(controller.head(), head_before);
    assert!(!controller.txstore().contains(&forbidden.id).unwrap());
    assert_eq!(
        controller
            .value_at(Version::from(forbidden.id), &Keypath::root())
            .unwrap(),
        None
    );

    // a mixed tx is rejected atomically
    let mixed = TxBuilder::new(STATE_URI)
        .parent(allowed.id)
        .patch(Patch::parse(r#".commits.deadbeef.message = "ok""#).unwrap())
        .patch(Patch::parse(r#".demo.value = "state:evil""#).unwrap())
        .sign(&stranger)
        .unwrap();
    assert!(controller.admit(mixed).is_err());
}

#[test]
fn test_owner_may_write_anywhere() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = open_controller(&dir);
    let owner = NodeIdentity::generate();

    let genesis = genesis_tx(&owner);
    controller.admit(genesis.clone()).unwrap();

    let tx = TxBuilder::new(STATE_URI)
        .parent(genesis.id)
        .patch(Patch::parse(r#".demo.value = "state:elsewhere""#).unwrap())
        .sign(&owner)
        .unwrap();
    let (outcome, _) = controller.admit(tx).unwrap();
    assert!(matches!(outcome, AdmitOutcome::Admitted { .. }));
}

#[test]
fn test_replay_determinism_across_admission_orders() {
    let owner = NodeIdentity::generate();
    let genesis = genesis_tx(&owner);

    // two concurrent siblings touching the same key, then a merge child
    let a = TxBuilder::new(STATE_URI)
        .id(TxId([0xaa; 32]))
        .parent(genesis.id)
        .patch(Patch::parse(r#".refs.heads.master = {"HEAD": "from-a"}"#).unwrap())
        .patch(Patch::parse(r#".refs.tags.a = "yes""#).unwrap())
        .sign(&owner)
        .unwrap();
    let b = TxBuilder::new(STATE_URI)
        .id(TxId([0xbb; 32]))
        .parent(genesis.id)
        .patch(Patch::parse(r#".refs.heads.master = {"HEAD": "from-b"}"#).unwrap())
        .patch(Patch::parse(r#".refs.tags.b = "yes""#).unwrap())
        .sign(&owner)
        .unwrap();
    let c = TxBuilder::new(STATE_URI)
        .id(TxId([0xcc; 32]))
        .parents(vec![a.id, b.id])
        .patch(Patch::parse(r#".refs.tags.merged = true"#).unwrap())
        .sign(&owner)
        .unwrap();

    let orders: Vec<Vec<&Transaction>> = vec![
        vec![&genesis, &a, &b, &c],
        vec![&genesis, &b, &a, &c],
        vec![&genesis, &b, &c, &a],
        vec![&c, &a, &genesis, &b],
    ];

    let mut finals = Vec::new();
    for order in orders {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = open_controller(&dir);
        for tx in order {
            // parked outcomes are fine; everything admits by the end
            controller.admit(tx.clone()).unwrap();
        }
        let refs = controller.head_value(&Keypath::from("refs")).unwrap();
        assert!(refs.is_some());
        finals.push(refs);
    }

    for other in &finals[1..] {
        assert_eq!(&finals[0], other, "replay must not depend on arrival order");
    }
}

#[test]
fn test_controller_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let owner = NodeIdentity::generate();
    let genesis = genesis_tx(&owner);
    let commit = commit_tx(&owner, vec![genesis.id]);

    let head = {
        let mut controller = open_controller(&dir);
        controller.admit(genesis.clone()).unwrap();
        controller.admit(commit.clone()).unwrap();
        controller.head()
    };

    let controller = open_controller(&dir);
    assert_eq!(controller.head(), head);
    assert!(controller.leaves().contains(&commit.id));
    assert_eq!(
        controller
            .head_value(&Keypath::from("refs/heads/master/HEAD"))
            .unwrap(),
        Some(Value::Str(COMMIT1.into()))
    );
}
