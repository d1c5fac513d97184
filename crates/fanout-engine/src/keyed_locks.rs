use std::collections::HashMap;
use std::sync::Arc;

use fanout_types::SourceKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutual exclusion scoped to one source post.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<SourceKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder owns `key`. Slots nobody holds or waits on
    /// are dropped on the way in.
    pub async fn acquire(&self, key: &SourceKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        slot.lock_owned().await
    }

    pub async fn tracked_keys(&self) -> usize {
        self.slots.lock().await.len()
    }
}
