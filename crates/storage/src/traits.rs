use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{BatchRecord, ProductRecord};

/// The storage trait for ledger backends.
///
/// A `LedgerStore` keeps exactly one record per identifier for each record
/// family (batches, products). Records are replaced whole; there is no
/// partial-update primitive.
///
/// ## Version Validation
///
/// `insert_*` stores the record at version 0 and fails with
/// `StorageError::AlreadyExists` if the identifier is taken, leaving the
/// existing record untouched.
///
/// `update_*` is conditional on the stored version equal to
/// `expected_version`. On mismatch it returns
/// `StorageError::ConcurrentConflict` and changes nothing. On success the
/// stored record carries `expected_version + 1`, which is returned.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared through axum
/// application state and across async task boundaries.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    // ── Batches ──────────────────────────────────────────────────────────────

    /// Read a batch. Returns `Err(StorageError::NotFound)` if absent.
    async fn get_batch(&self, batch_id: &str) -> Result<BatchRecord, StorageError>;

    async fn batch_exists(&self, batch_id: &str) -> Result<bool, StorageError>;

    /// Store a new batch at version 0.
    async fn insert_batch(&self, record: BatchRecord) -> Result<(), StorageError>;

    /// Replace a batch if its stored version is `expected_version`.
    async fn update_batch(
        &self,
        record: BatchRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// All batches, sorted by identifier.
    async fn list_batches(&self) -> Result<Vec<BatchRecord>, StorageError>;

    // ── Products ─────────────────────────────────────────────────────────────

    /// Read a product. Returns `Err(StorageError::NotFound)` if absent.
    async fn get_product(&self, product_id: &str) -> Result<ProductRecord, StorageError>;

    async fn product_exists(&self, product_id: &str) -> Result<bool, StorageError>;

    /// Store a new product at version 0.
    async fn insert_product(&self, record: ProductRecord) -> Result<(), StorageError>;

    /// Replace a product if its stored version is `expected_version`.
    async fn update_product(
        &self,
        record: ProductRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// All products, sorted by identifier.
    async fn list_products(&self) -> Result<Vec<ProductRecord>, StorageError>;
}
