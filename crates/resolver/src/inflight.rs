//! Per-key locks that collapse concurrent cache misses.
//!
//! The first caller to miss on a key computes while later callers for the
//! same key wait, then find the stored artifact on their re-check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use climate_common::CacheKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyLocks {
    enabled: bool,
    locks: Mutex<HashMap<CacheKey, Weak<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait for exclusive use of `key`. Returns None when locking is off.
    pub async fn acquire(&self, key: &CacheKey) -> Option<OwnedMutexGuard<()>> {
        if !self.enabled {
            return None;
        }

        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // drop entries nobody holds anymore
            locks.retain(|_, weak| weak.strong_count() > 0);

            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    locks.insert(key.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };

        Some(lock.lock_owned().await)
    }

    /// Keys with a live lock.
    pub fn in_flight(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.values().filter(|w| w.strong_count() > 0).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .values()
                .filter(|w| w.strong_count() > 0)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_disabled_never_blocks() {
        let locks = KeyLocks::new(false);
        let key = CacheKey::from_raw("k");
        assert!(locks.acquire(&key).await.is_none());
        assert!(locks.acquire(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new(true));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&CacheKey::from_raw("same")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new(true);
        let _a = locks.acquire(&CacheKey::from_raw("a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&CacheKey::from_raw("b")),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(locks.in_flight(), 2);
    }
}
