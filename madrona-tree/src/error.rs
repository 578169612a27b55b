//! Errors from tree store operations

use madrona_model::Version;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("not found")]
    NotFound,

    #[error("invalid range")]
    InvalidRange,

    #[error("wrong node type: expected {expected}, found {found}")]
    WrongNodeType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("node is read-only")]
    ReadOnly,

    #[error("node is closed")]
    Closed,

    #[error("version {0} already has a writer")]
    WriteConflict(Version),

    #[error("corrupt tree data: {0}")]
    Corrupt(String),

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
