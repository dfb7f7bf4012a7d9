use std::future::Future;
use std::sync::Arc;

use super::{make_batch, TestResult};
use crate::{LedgerStore, StorageError};

const N: usize = 8;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "racing_inserts_one_winner",
            racing_inserts_one_winner(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "racing_updates_one_winner",
            racing_updates_one_winner(factory).await,
        ),
    ]
}

// ── Concurrent inserts of the same id: exactly one wins ─────────────────────

async fn racing_inserts_one_winner<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            match s.insert_batch(make_batch("B1", &format!("crop-{i}"))).await {
                Ok(()) => Ok::<bool, StorageError>(true),
                Err(StorageError::AlreadyExists { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

// ── Concurrent updates from the same version: exactly one wins ──────────────

async fn racing_updates_one_winner<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    storage
        .insert_batch(make_batch("B1", "Rice"))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut b = s.get_batch("B1").await?;
            b.events.push(serde_json::json!({"writer": i}));
            match s.update_batch(b, 0).await {
                Ok(_) => Ok::<bool, StorageError>(true),
                Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    let record = storage
        .get_batch("B1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if record.version != 1 || record.events.len() != 1 {
        return Err(format!(
            "expected version 1 with one event, got version {} with {} events",
            record.version,
            record.events.len()
        ));
    }
    Ok(())
}
