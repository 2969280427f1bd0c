//! Per-key exclusive async locks.
//!
//! Fetches for an entry and eviction of that entry take the same key, so
//! they never interleave. Entries are dropped from the map once the last
//! holder releases, keeping the map as small as the set of busy keys.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Default, Clone)]
pub struct KeyedLock {
    locks: LockMap,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops,
    /// including on early return and task cancellation.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let slot = {
            let mut locks = self.locks.lock();
            locks.entry(key.to_string()).or_default().clone()
        };

        let guard = slot.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct KeyGuard {
    key: String,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the count below only sees the map and waiters.
        self.guard.take();

        let mut locks = self.locks.lock();
        if let Some(slot) = locks.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}
