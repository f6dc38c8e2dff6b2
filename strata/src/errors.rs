use crate::{Oid, Xid};
use std::fmt;
use std::io;

/// Errors raised by the storage engine.
#[derive(Debug)]
pub enum StorageError {
    Io(io::Error),
    /// No unpinned frame is available for eviction.
    PoolFull,
    /// A record larger than the maximum a page can ever hold.
    RecordTooLarge(usize),
    /// On-disk or in-memory structure violates a layout invariant.
    Corruption(String),
    /// A log append referenced a transaction missing from the active
    /// transaction table. Indicates a driver bug.
    UnknownTransaction(Xid),
    /// `Begin` was logged for a transaction already in the active table.
    TransactionAlreadyActive(Xid),
    TableNotFound(Oid),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "io error: {}", err),
            StorageError::PoolFull => write!(f, "buffer pool full: all frames pinned"),
            StorageError::RecordTooLarge(size) => {
                write!(f, "record size too large: {}", size)
            }
            StorageError::Corruption(msg) => write!(f, "corruption: {}", msg),
            StorageError::UnknownTransaction(xid) => {
                write!(f, "transaction {} not in active transaction table", xid)
            }
            StorageError::TransactionAlreadyActive(xid) => {
                write!(f, "transaction {} already in active transaction table", xid)
            }
            StorageError::TableNotFound(oid) => write!(f, "table {} not found", oid),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
