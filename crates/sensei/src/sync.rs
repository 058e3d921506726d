//! Keyed async locking and stage deadlines
//!
//! Serializes work per key without one global lock: per-content processing
//! and per-role training slots each get their own mutex, created on first
//! use. [`with_deadline`] wraps a stage future in its configured timeout.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{PipelineError, PipelineResult};

/// A map of async mutexes, one per key
#[derive(Debug)]
pub struct KeyedMutex<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for `key`, waiting if another task holds it.
    ///
    /// The guard is owned so it can be held across awaits and moved into
    /// spawned tasks.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let cell = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        cell.lock_owned().await
    }

    /// Acquire the lock for `key` only if it is free right now.
    pub fn try_lock(&self, key: K) -> Option<OwnedMutexGuard<()>> {
        let cell = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        cell.try_lock_owned().ok()
    }
}

/// Await `future` under `deadline`, mapping expiry to a `Timeout` error
/// naming `what`.
///
/// A zero deadline disables the clock entirely: the future runs unwrapped
/// instead of expiring on its first pending poll.
pub async fn with_deadline<T, F>(
    deadline: Duration,
    what: impl std::fmt::Display,
    future: F,
) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    if deadline.is_zero() {
        return future.await;
    }
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::timeout(format!(
            "{what} exceeded {}s",
            deadline.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedMutex::new());
        let guard = locks.lock("a".to_string()).await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move { locks2.lock("a".to_string()).await });

        // Still blocked while the first guard is held
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedMutex::new();
        let _a = locks.lock("a".to_string()).await;
        // Would deadlock if keys shared a lock
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b".to_string()))
            .await
            .expect("different key must not block");
    }

    #[tokio::test]
    async fn test_try_lock_reports_contention() {
        let locks = KeyedMutex::new();
        let held = locks.lock(1u64).await;
        assert!(locks.try_lock(1u64).is_none());
        drop(held);
        assert!(locks.try_lock(1u64).is_some());
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_a_timeout_error() {
        let err = with_deadline(Duration::from_millis(10), "slow stage", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
        assert!(err.to_string().contains("slow stage"));
    }

    #[tokio::test]
    async fn test_zero_deadline_never_expires() {
        // A pending poll under a zero-duration timer would expire; disabled
        // means the future just runs
        let value = with_deadline(Duration::ZERO, "unclocked stage", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(42)
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
    }
}
