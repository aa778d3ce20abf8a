use std::io;
use strata::errors::{LockError, StorageError};

/// Errors surfaced by the query layer.
#[derive(Debug)]
pub enum QueryError {
    TableNotFound(String),
    TableExists(String),
    ColumnNotFound(String),
    AmbiguousColumn(String),
    IncompatibleType { expected: String, got: String },
    InvalidValueCount { table: String },
    StringOverflow { len: usize, max: usize },
    Internal(String),
    Deadlock,
    Storage(StorageError),
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Lock(LockError::Deadlock) => QueryError::Deadlock,
            other => QueryError::Storage(other),
        }
    }
}

impl From<LockError> for QueryError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Deadlock => QueryError::Deadlock,
            LockError::LockOnShrinking => {
                QueryError::Internal("lock requested in shrinking phase".to_string())
            }
        }
    }
}

impl From<io::Error> for QueryError {
    fn from(err: io::Error) -> Self {
        QueryError::Storage(StorageError::Io(err))
    }
}
