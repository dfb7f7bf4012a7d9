use std::future::Future;

use super::{make_batch, make_product, TestResult};
use crate::{LedgerStore, RecordKind, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "error",
            "get_batch_nonexistent",
            get_batch_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "get_product_nonexistent",
            get_product_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "update_batch_nonexistent",
            update_batch_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "update_product_nonexistent",
            update_product_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "list_empty_store",
            list_empty_store(factory).await,
        ),
    ]
}

async fn get_batch_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_batch("missing").await {
        Err(StorageError::NotFound { kind, id }) if kind == RecordKind::Batch && id == "missing" => {
            Ok(())
        }
        other => Err(format!("expected NotFound(batch, missing), got {:?}", other)),
    }
}

async fn get_product_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_product("missing").await {
        Err(StorageError::NotFound { kind, .. }) if kind == RecordKind::Product => Ok(()),
        other => Err(format!("expected NotFound(product), got {:?}", other)),
    }
}

async fn update_batch_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.update_batch(make_batch("ghost", "Rice"), 0).await {
        Err(StorageError::NotFound { .. }) => {}
        other => return Err(format!("expected NotFound, got {:?}", other)),
    }
    if s.batch_exists("ghost").await.map_err(|e| e.to_string())? {
        return Err("update must not create a record".into());
    }
    Ok(())
}

async fn update_product_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.update_product(make_product("ghost"), 0).await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {:?}", other)),
    }
}

async fn list_empty_store<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let batches = s.list_batches().await.map_err(|e| e.to_string())?;
    let products = s.list_products().await.map_err(|e| e.to_string())?;
    if !batches.is_empty() || !products.is_empty() {
        return Err("fresh store is not empty".into());
    }
    Ok(())
}
