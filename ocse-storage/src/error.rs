use ocse_core::CseError;

/// Error type for storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// A staged write referenced a resource that does not exist.
    NotFound(String),
    /// A uniqueness invariant (ri, or sibling resource name) was violated.
    Conflict(String),
    /// The backend failed.
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::Conflict(msg) => write!(f, "conflict: {msg}"),
            StorageError::Backend(msg) => write!(f, "storage backend error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Conflict(err.to_string())
            }
            _ => StorageError::Backend(err.to_string()),
        }
    }
}

impl From<StorageError> for CseError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => CseError::not_found(msg),
            StorageError::Conflict(msg) => CseError::conflict(msg),
            StorageError::Backend(msg) => CseError::internal(msg),
        }
    }
}
