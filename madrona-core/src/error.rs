//! Errors from the replication core

use madrona_model::TxId;
use madrona_tree::TreeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("invalid range")]
    InvalidRange,

    #[error("resolver failed: {0}")]
    Failed(String),

    #[error("bad resolver config: {0}")]
    BadConfig(String),
}

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("write to {keypath} forbidden for {from}")]
    Forbidden { from: String, keypath: String },

    #[error("bad validator config: {0}")]
    BadConfig(String),
}

#[derive(Error, Debug)]
pub enum TxStoreError {
    #[error("transaction encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("bad signature")]
    BadSignature,

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error("no registered handler for content type {0:?}")]
    UnknownContentType(String),

    #[error("unknown transaction {0}")]
    UnknownTx(TxId),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    TxStore(#[from] TxStoreError),

    #[error("controller closed")]
    Closed,
}
