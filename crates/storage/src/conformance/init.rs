use std::future::Future;

use super::{make_batch, make_product, TestResult};
use crate::{LedgerStore, RecordKind, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "insert_then_get_returns_same_batch",
            insert_then_get_returns_same_batch(factory).await,
        ),
        TestResult::from_result(
            "init",
            "insert_sets_version_zero",
            insert_sets_version_zero(factory).await,
        ),
        TestResult::from_result(
            "init",
            "insert_makes_batch_exist",
            insert_makes_batch_exist(factory).await,
        ),
        TestResult::from_result(
            "init",
            "duplicate_insert_returns_already_exists",
            duplicate_insert_returns_already_exists(factory).await,
        ),
        TestResult::from_result(
            "init",
            "duplicate_insert_keeps_original",
            duplicate_insert_keeps_original(factory).await,
        ),
        TestResult::from_result(
            "init",
            "batches_and_products_are_separate",
            batches_and_products_are_separate(factory).await,
        ),
        TestResult::from_result(
            "init",
            "list_batches_sorted_by_id",
            list_batches_sorted_by_id(factory).await,
        ),
        TestResult::from_result(
            "init",
            "duplicate_product_returns_already_exists",
            duplicate_product_returns_already_exists(factory).await,
        ),
    ]
}

async fn insert_then_get_returns_same_batch<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut batch = make_batch("B1", "Rice");
    batch.events.push(serde_json::json!({"type": "harvested"}));
    s.insert_batch(batch.clone())
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let read = s.get_batch("B1").await.map_err(|e| format!("get: {e}"))?;
    if read.meta != batch.meta || read.events != batch.events {
        return Err(format!("read back differs: {:?}", read));
    }
    Ok(())
}

async fn insert_sets_version_zero<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut batch = make_batch("B1", "Rice");
    batch.version = 7;
    s.insert_batch(batch).await.map_err(|e| format!("insert: {e}"))?;
    let read = s.get_batch("B1").await.map_err(|e| format!("get: {e}"))?;
    if read.version != 0 {
        return Err(format!("expected version 0, got {}", read.version));
    }
    Ok(())
}

async fn insert_makes_batch_exist<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    if s.batch_exists("B1").await.map_err(|e| e.to_string())? {
        return Err("empty store reports B1 as existing".into());
    }
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    if !s.batch_exists("B1").await.map_err(|e| e.to_string())? {
        return Err("B1 missing after insert".into());
    }
    Ok(())
}

async fn duplicate_insert_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    match s.insert_batch(make_batch("B1", "Wheat")).await {
        Err(StorageError::AlreadyExists { kind, id }) if kind == RecordKind::Batch && id == "B1" => {
            Ok(())
        }
        other => Err(format!("expected AlreadyExists(batch, B1), got {:?}", other)),
    }
}

async fn duplicate_insert_keeps_original<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let _ = s.insert_batch(make_batch("B1", "Wheat")).await;
    let all = s.list_batches().await.map_err(|e| e.to_string())?;
    if all.len() != 1 {
        return Err(format!("expected exactly one batch, got {}", all.len()));
    }
    if all[0].meta.crop_type.as_deref() != Some("Rice") {
        return Err(format!("original metadata overwritten: {:?}", all[0].meta));
    }
    Ok(())
}

async fn batches_and_products_are_separate<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_batch(make_batch("X1", "Rice"))
        .await
        .map_err(|e| format!("insert batch: {e}"))?;
    s.insert_product(make_product("X1"))
        .await
        .map_err(|e| format!("insert product with same id: {e}"))?;
    if !s.product_exists("X1").await.map_err(|e| e.to_string())? {
        return Err("product X1 missing".into());
    }
    Ok(())
}

async fn list_batches_sorted_by_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for id in ["B3", "B1", "B2"] {
        s.insert_batch(make_batch(id, "Rice"))
            .await
            .map_err(|e| format!("insert {id}: {e}"))?;
    }
    let ids: Vec<String> = s
        .list_batches()
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|b| b.batch_id)
        .collect();
    if ids != ["B1", "B2", "B3"] {
        return Err(format!("unexpected order: {:?}", ids));
    }
    Ok(())
}

async fn duplicate_product_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_product(make_product("P1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    match s.insert_product(make_product("P1")).await {
        Err(StorageError::AlreadyExists { kind, .. }) if kind == RecordKind::Product => Ok(()),
        other => Err(format!("expected AlreadyExists(product), got {:?}", other)),
    }
}
