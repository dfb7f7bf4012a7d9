use std::future::Future;

use super::{make_batch, make_product, TestResult};
use crate::{LedgerStore, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "update_increments_version",
            update_increments_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "update_returns_new_version",
            update_returns_new_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "read_after_update_returns_written_data",
            read_after_update_returns_written_data(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_version_returns_conflict",
            stale_version_returns_conflict(factory).await,
        ),
        TestResult::from_result(
            "version",
            "conflict_does_not_change_record",
            conflict_does_not_change_record(factory).await,
        ),
        TestResult::from_result(
            "version",
            "product_versions_are_independent",
            product_versions_are_independent(factory).await,
        ),
    ]
}

async fn update_increments_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    for expected in 0..3u64 {
        let b = s.get_batch("B1").await.map_err(|e| e.to_string())?;
        if b.version != expected {
            return Err(format!("expected version {expected}, got {}", b.version));
        }
        s.update_batch(b, expected)
            .await
            .map_err(|e| format!("update from {expected}: {e}"))?;
    }
    Ok(())
}

async fn update_returns_new_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let b = s.get_batch("B1").await.map_err(|e| e.to_string())?;
    let v = s.update_batch(b, 0).await.map_err(|e| e.to_string())?;
    if v != 1 {
        return Err(format!("expected 1, got {v}"));
    }
    Ok(())
}

async fn read_after_update_returns_written_data<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let mut b = s.get_batch("B1").await.map_err(|e| e.to_string())?;
    b.events.push(serde_json::json!({"type": "harvested"}));
    b.meta.delivered = true;
    s.update_batch(b.clone(), 0)
        .await
        .map_err(|e| e.to_string())?;
    let read = s.get_batch("B1").await.map_err(|e| e.to_string())?;
    if read.events != b.events || !read.meta.delivered {
        return Err(format!("read after write differs: {:?}", read));
    }
    Ok(())
}

async fn stale_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let first = s.get_batch("B1").await.map_err(|e| e.to_string())?;
    let second = first.clone();
    s.update_batch(first, 0).await.map_err(|e| e.to_string())?;
    match s.update_batch(second, 0).await {
        Err(StorageError::ConcurrentConflict {
            expected_version, ..
        }) if expected_version == 0 => Ok(()),
        other => Err(format!("expected ConcurrentConflict at 0, got {:?}", other)),
    }
}

async fn conflict_does_not_change_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let mut stale = s.get_batch("B1").await.map_err(|e| e.to_string())?;
    stale.meta.paid = true;
    let _ = s.update_batch(stale, 5).await;
    let read = s.get_batch("B1").await.map_err(|e| e.to_string())?;
    if read.version != 0 || read.meta.paid {
        return Err(format!("conflicting update leaked: {:?}", read));
    }
    Ok(())
}

async fn product_versions_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_product(make_product("P1"))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_product(make_product("P2"))
        .await
        .map_err(|e| e.to_string())?;
    let p1 = s.get_product("P1").await.map_err(|e| e.to_string())?;
    s.update_product(p1, 0).await.map_err(|e| e.to_string())?;
    let p2 = s.get_product("P2").await.map_err(|e| e.to_string())?;
    if p2.version != 0 {
        return Err(format!("P2 version changed to {}", p2.version));
    }
    Ok(())
}
