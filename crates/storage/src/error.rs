use crate::record::RecordKind;

/// All errors that can be returned by a MarketStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another writer committed a
    /// newer version of the record since it was read.
    #[error("concurrent conflict on {kind} {id}: expected version {expected_version}")]
    ConcurrentConflict {
        kind: RecordKind,
        id: String,
        expected_version: i64,
    },

    /// No record with the given (kind, id).
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    /// A record with this (kind, id) already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: RecordKind, id: String },

    /// A record body could not be encoded or decoded.
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A backend-specific storage error (file I/O, corrupt store, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}
