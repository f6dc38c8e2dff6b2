use std::fmt;
use strata::StorageError;

/// Errors raised during plan building and execution.
#[derive(Debug)]
pub enum EngineError {
    Storage(StorageError),
    /// A `lock_table` / `lock_row` call returned false. The statement
    /// fails and the caller rolls the transaction back.
    LockConflict,
    ColumnNotFound(String),
    Generic(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Storage(err) => write!(f, "storage error: {}", err),
            EngineError::LockConflict => write!(f, "lock conflict"),
            EngineError::ColumnNotFound(name) => write!(f, "column not found: {}", name),
            EngineError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::Storage(err)
    }
}
