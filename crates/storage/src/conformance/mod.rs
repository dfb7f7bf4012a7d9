//! Conformance test suite for `LedgerStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any `LedgerStore`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Insertion**: first registration, duplicate rejection that leaves the
//!   original record untouched
//! - **Version validation / OCC**: version bump on update, stale-version conflicts
//! - **Errors**: correct variants for missing records
//! - **Concurrency**: racing inserts and updates have exactly one winner
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use agritrace_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod error;
mod init;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::{BatchMeta, BatchRecord, ProductRecord};
use crate::LedgerStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "version").
    pub category: String,
    /// Test name (e.g. "duplicate_insert_keeps_original").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a store backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_batch(id: &str, crop: &str) -> BatchRecord {
    BatchRecord::new(
        id,
        BatchMeta {
            farmer_addr: "0x00000000000000000000000000000000000000aa".to_string(),
            crop_type: Some(crop.to_string()),
            harvest_date: Some("2024-12-15".to_string()),
            location: Some("Nashik".to_string()),
            price_eth: Some("0.5".to_string()),
            ..Default::default()
        },
    )
}

fn make_product(id: &str) -> ProductRecord {
    ProductRecord {
        product_id: id.to_string(),
        product_name: "Organic Wheat".to_string(),
        farmer_name: "Test Farmer".to_string(),
        farmer_location: "Test Farm, Mumbai".to_string(),
        crop_type: "Wheat".to_string(),
        harvest_date: "2024-12-15".to_string(),
        chain: Default::default(),
        stages: Vec::new(),
        version: 0,
        created_at: "2025-01-01T00:00:00Z".to_string(),
        updated_at: "2025-01-01T00:00:00Z".to_string(),
    }
}
