//! Per-identifier write serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SlotMap, MutexGuard};

use tokio::sync::{Mutex, OwnedMutexGuard};

type Slots = HashMap<String, Arc<Mutex<()>>>;

/// One async mutex per key, created on first use and dropped when the last
/// holder or waiter lets go.
///
/// Writers to the same record queue up behind each other, including while
/// the chain write is awaited; writers to different records run in parallel.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    slots: SlotMap<Slots>,
}

/// Held for the duration of one write.
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) async fn lock(&self, key: String) -> KeyGuard<'_> {
        let slot = self
            .slots()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            locks: self,
            key,
            guard: Some(slot.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are only taken under the map lock, so a count of one means
        // nobody else holds or waits for this slot.
        let mut slots = self.locks.slots();
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedLocks::default());
        let guard = locks.lock("batch:B1".to_string()).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("batch:B1".to_string()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::default();
        let _first = locks.lock("batch:B1".to_string()).await;
        let _second = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock("batch:B2".to_string()),
        )
        .await
        .expect("independent key");
    }

    #[tokio::test]
    async fn test_released_keys_are_pruned() {
        let locks = Arc::new(KeyedLocks::default());
        for i in 0..100 {
            let _guard = locks.lock(format!("batch:B{}", i)).await;
        }
        assert_eq!(locks.len(), 0);

        let guard = locks.lock("batch:B1".to_string()).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("batch:B1".to_string()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The waiter keeps the slot alive after the first holder leaves.
        drop(guard);
        contender.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
