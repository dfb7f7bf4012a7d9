//! The whole-store document shared by both backends.
//!
//! Shape on disk: `{ "batches": { id: BatchRecord }, "products": { id: ProductRecord } }`.
//! Unknown top-level keys are carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RecordKind, StorageError};
use crate::record::{now_rfc3339, BatchRecord, ProductRecord};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LedgerDocument {
    #[serde(default)]
    pub(crate) batches: BTreeMap<String, BatchRecord>,
    #[serde(default)]
    pub(crate) products: BTreeMap<String, ProductRecord>,
    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, serde_json::Value>,
}

/// Access to the identifier and version of a stored record.
pub(crate) trait Versioned: Clone {
    const KIND: RecordKind;
    fn id(&self) -> &str;
    fn version(&self) -> u64;
    fn stamp(&mut self, version: u64);
}

impl Versioned for BatchRecord {
    const KIND: RecordKind = RecordKind::Batch;

    fn id(&self) -> &str {
        &self.batch_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn stamp(&mut self, version: u64) {
        self.version = version;
        self.updated_at = now_rfc3339();
    }
}

impl Versioned for ProductRecord {
    const KIND: RecordKind = RecordKind::Product;

    fn id(&self) -> &str {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn stamp(&mut self, version: u64) {
        self.version = version;
        self.updated_at = now_rfc3339();
    }
}

pub(crate) fn get<R: Versioned>(map: &BTreeMap<String, R>, id: &str) -> Result<R, StorageError> {
    map.get(id)
        .cloned()
        .ok_or_else(|| StorageError::not_found(R::KIND, id))
}

pub(crate) fn insert<R: Versioned>(
    map: &mut BTreeMap<String, R>,
    mut record: R,
) -> Result<(), StorageError> {
    if map.contains_key(record.id()) {
        return Err(StorageError::already_exists(R::KIND, record.id()));
    }
    record.stamp(0);
    map.insert(record.id().to_string(), record);
    Ok(())
}

pub(crate) fn update<R: Versioned>(
    map: &mut BTreeMap<String, R>,
    mut record: R,
    expected_version: u64,
) -> Result<u64, StorageError> {
    let stored = map
        .get(record.id())
        .ok_or_else(|| StorageError::not_found(R::KIND, record.id()))?;
    if stored.version() != expected_version {
        return Err(StorageError::ConcurrentConflict {
            kind: R::KIND,
            id: record.id().to_string(),
            expected_version,
        });
    }
    let new_version = expected_version + 1;
    record.stamp(new_version);
    map.insert(record.id().to_string(), record);
    Ok(new_version)
}
