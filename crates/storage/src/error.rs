use std::fmt;

/// Which record family an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Batch,
    Product,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Batch => f.write_str("batch"),
            RecordKind::Product => f.write_str("product"),
        }
    }
}

/// All errors that can be returned by a LedgerStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No record with the given identifier.
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    /// A record with this identifier already exists; identifiers are unique.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: RecordKind, id: String },

    /// Optimistic concurrency control conflict: the stored version is no
    /// longer the one the caller read.
    #[error("concurrent conflict on {kind} {id}: expected version {expected_version}")]
    ConcurrentConflict {
        kind: RecordKind,
        id: String,
        expected_version: u64,
    },

    /// A backend-specific storage error (I/O, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn not_found(kind: RecordKind, id: &str) -> Self {
        StorageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: RecordKind, id: &str) -> Self {
        StorageError::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }
}
