use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{self, LedgerDocument};
use crate::error::StorageError;
use crate::record::{BatchRecord, ProductRecord};
use crate::traits::LedgerStore;

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: RwLock<LedgerDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_batch(&self, batch_id: &str) -> Result<BatchRecord, StorageError> {
        document::get(&self.doc.read().await.batches, batch_id)
    }

    async fn batch_exists(&self, batch_id: &str) -> Result<bool, StorageError> {
        Ok(self.doc.read().await.batches.contains_key(batch_id))
    }

    async fn insert_batch(&self, record: BatchRecord) -> Result<(), StorageError> {
        document::insert(&mut self.doc.write().await.batches, record)
    }

    async fn update_batch(
        &self,
        record: BatchRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        document::update(&mut self.doc.write().await.batches, record, expected_version)
    }

    async fn list_batches(&self) -> Result<Vec<BatchRecord>, StorageError> {
        Ok(self.doc.read().await.batches.values().cloned().collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<ProductRecord, StorageError> {
        document::get(&self.doc.read().await.products, product_id)
    }

    async fn product_exists(&self, product_id: &str) -> Result<bool, StorageError> {
        Ok(self.doc.read().await.products.contains_key(product_id))
    }

    async fn insert_product(&self, record: ProductRecord) -> Result<(), StorageError> {
        document::insert(&mut self.doc.write().await.products, record)
    }

    async fn update_product(
        &self,
        record: ProductRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        document::update(&mut self.doc.write().await.products, record, expected_version)
    }

    async fn list_products(&self) -> Result<Vec<ProductRecord>, StorageError> {
        Ok(self.doc.read().await.products.values().cloned().collect())
    }
}
