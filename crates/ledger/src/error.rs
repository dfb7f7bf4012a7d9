use agritrace_chain::ChainError;
use agritrace_storage::{BatchRecord, ProductRecord, StorageError};
use serde::Serialize;
use thiserror::Error;

/// The record left in the store after a chain write failed.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PartialRecord {
    Batch(BatchRecord),
    Product(ProductRecord),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or malformed request field. Nothing was written.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The identifier is already registered. Nothing was written.
    #[error("{0}")]
    Duplicate(String),

    /// Another writer changed the record between read and write.
    #[error("{0}")]
    Conflict(String),

    /// Chain failure before any local write (reads, verification).
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The local write succeeded; the chain write did not. `record` is what
    /// the store now holds, with the failure noted on it.
    #[error("saved locally but chain write failed: {source}")]
    PartialFailure {
        record: Box<PartialRecord>,
        source: ChainError,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StorageError::AlreadyExists { .. } => ServiceError::Duplicate(err.to_string()),
            StorageError::ConcurrentConflict { .. } => ServiceError::Conflict(err.to_string()),
            StorageError::Backend(msg) => ServiceError::Storage(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use agritrace_storage::RecordKind;

    #[test]
    fn test_storage_error_mapping() {
        let err: ServiceError = StorageError::AlreadyExists {
            kind: RecordKind::Batch,
            id: "B1".into(),
        }
        .into();
        assert!(matches!(err, ServiceError::Duplicate(ref m) if m == "batch already exists: B1"));

        let err: ServiceError = StorageError::ConcurrentConflict {
            kind: RecordKind::Product,
            id: "P1".into(),
            expected_version: 3,
        }
        .into();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err: ServiceError = StorageError::Backend("disk full".into()).into();
        assert_eq!(err.to_string(), "storage error: disk full");
    }

    #[test]
    fn test_partial_failure_display() {
        let err = ServiceError::PartialFailure {
            record: Box::new(PartialRecord::Batch(BatchRecord::new(
                "B1",
                Default::default(),
            ))),
            source: ChainError::Timeout {
                tx_hash: "0xfeed".into(),
                secs: 120,
            },
        };
        assert_eq!(
            err.to_string(),
            "saved locally but chain write failed: Transaction 0xfeed not confirmed after 120 seconds"
        );
    }
}
