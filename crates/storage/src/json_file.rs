//! Single-file JSON backend.
//!
//! Every mutation reads the whole document, applies the change, and writes
//! the whole document back. Mutations inside one process are serialized by
//! an async mutex; the file lands via write-to-temp-then-rename so a reader
//! never observes a half-written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::document::{self, LedgerDocument};
use crate::error::StorageError;
use crate::record::{BatchRecord, ProductRecord};
use crate::traits::LedgerStore;

pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store at `path`. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        JsonFileStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<LedgerDocument, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LedgerDocument::default())
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(LedgerDocument::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::Backend(format!("parse {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, doc: &LedgerDocument) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(doc)
            .map_err(|e| StorageError::Backend(format!("serialize ledger: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Backend(format!("create {}: {}", parent.display(), e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StorageError::Backend(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StorageError::Backend(format!("rename into {}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), bytes = json.len(), "ledger saved");
        Ok(())
    }

    /// Read-modify-write under the write lock.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut LedgerDocument) -> Result<T, StorageError> + Send,
    ) -> Result<T, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        let out = f(&mut doc)?;
        self.save(&doc).await?;
        Ok(out)
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn get_batch(&self, batch_id: &str) -> Result<BatchRecord, StorageError> {
        document::get(&self.load().await?.batches, batch_id)
    }

    async fn batch_exists(&self, batch_id: &str) -> Result<bool, StorageError> {
        Ok(self.load().await?.batches.contains_key(batch_id))
    }

    async fn insert_batch(&self, record: BatchRecord) -> Result<(), StorageError> {
        self.mutate(|doc| document::insert(&mut doc.batches, record))
            .await
    }

    async fn update_batch(
        &self,
        record: BatchRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        self.mutate(|doc| document::update(&mut doc.batches, record, expected_version))
            .await
    }

    async fn list_batches(&self) -> Result<Vec<BatchRecord>, StorageError> {
        Ok(self.load().await?.batches.into_values().collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<ProductRecord, StorageError> {
        document::get(&self.load().await?.products, product_id)
    }

    async fn product_exists(&self, product_id: &str) -> Result<bool, StorageError> {
        Ok(self.load().await?.products.contains_key(product_id))
    }

    async fn insert_product(&self, record: ProductRecord) -> Result<(), StorageError> {
        self.mutate(|doc| document::insert(&mut doc.products, record))
            .await
    }

    async fn update_product(
        &self,
        record: ProductRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        self.mutate(|doc| document::update(&mut doc.products, record, expected_version))
            .await
    }

    async fn list_products(&self) -> Result<Vec<ProductRecord>, StorageError> {
        Ok(self.load().await?.products.into_values().collect())
    }
}
