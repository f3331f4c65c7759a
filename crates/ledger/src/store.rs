//! Pool persistence with optimistic concurrency.
//!
//! Every pool carries a version. A commit succeeds only when the stored
//! version still equals the version the caller loaded; otherwise it fails with
//! `PersistenceConflict` and nothing is written.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use variant_core::config::LedgerConfig;
use variant_core::{Pool, PoolKey, VariantError, VariantResult};

pub trait PoolStore: Send + Sync {
    fn load(&self, key: &PoolKey) -> VariantResult<Option<Pool>>;

    /// Persist `pool` if the stored version equals `pool.version` (0 for a
    /// pool that does not exist yet). Returns the new version.
    fn commit(&self, pool: &Pool) -> VariantResult<u64>;

    fn keys(&self) -> VariantResult<Vec<PoolKey>>;
}

pub(crate) fn conflict(key: &PoolKey, expected: u64, found: u64) -> VariantError {
    metrics::counter!("ledger.commit.conflicts").increment(1);
    VariantError::PersistenceConflict {
        key: key.to_string(),
        expected,
        found,
    }
}

/// Process-local store. The compare-and-swap runs under the shard lock.
#[derive(Debug, Default)]
pub struct InMemoryPoolStore {
    pools: DashMap<PoolKey, Pool>,
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl PoolStore for InMemoryPoolStore {
    fn load(&self, key: &PoolKey) -> VariantResult<Option<Pool>> {
        Ok(self.pools.get(key).map(|entry| entry.clone()))
    }

    fn commit(&self, pool: &Pool) -> VariantResult<u64> {
        let mut next = pool.clone();
        next.version = pool.version + 1;

        match self.pools.entry(pool.key.clone()) {
            Entry::Occupied(mut entry) => {
                let found = entry.get().version;
                if found != pool.version {
                    return Err(conflict(&pool.key, pool.version, found));
                }
                entry.insert(next);
            }
            Entry::Vacant(entry) => {
                if pool.version != 0 {
                    return Err(conflict(&pool.key, pool.version, 0));
                }
                entry.insert(next);
            }
        }
        Ok(pool.version + 1)
    }

    fn keys(&self) -> VariantResult<Vec<PoolKey>> {
        Ok(self.pools.iter().map(|entry| entry.key().clone()).collect())
    }
}

/// How often and how patiently a read-modify-write is retried on conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            max_attempts: config.max_commit_attempts.max(1),
            backoff: Duration::from_millis(config.commit_backoff_ms),
        }
    }

    /// Single attempt, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

/// Optimistic read-modify-write on one pool.
///
/// `f` runs against a fresh copy on every attempt; an error from `f` aborts
/// without writing. Conflicts are retried with linear backoff until the
/// policy is exhausted, then surfaced to the caller.
pub fn transact<T, F>(
    store: &dyn PoolStore,
    key: &PoolKey,
    retry: RetryPolicy,
    mut f: F,
) -> VariantResult<T>
where
    F: FnMut(&mut Pool) -> VariantResult<T>,
{
    let mut attempt = 1;
    loop {
        let mut pool = store
            .load(key)?
            .ok_or_else(|| VariantError::PoolNotFound(key.to_string()))?;
        let out = f(&mut pool)?;

        match store.commit(&pool) {
            Ok(_) => return Ok(out),
            Err(e) if e.is_conflict() && attempt < retry.max_attempts => {
                debug!(pool = %key, attempt, "commit conflict, retrying");
                std::thread::sleep(retry.backoff * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn key() -> PoolKey {
        PoolKey::new("content-1", "tiktok")
    }

    #[test]
    fn test_commit_requires_matching_version() {
        let store = InMemoryPoolStore::new();
        let pool = Pool::new(key(), Utc::now());
        assert_eq!(store.commit(&pool).unwrap(), 1);

        // Stale copy (version 0) is rejected once version 1 is stored.
        let err = store.commit(&pool).unwrap_err();
        assert!(err.is_conflict());

        let loaded = store.load(&key()).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(store.commit(&loaded).unwrap(), 2);
        assert_eq!(store.keys().unwrap(), vec![key()]);
    }

    #[test]
    fn test_transact_missing_pool() {
        let store = InMemoryPoolStore::new();
        let result = transact(&store, &key(), RetryPolicy::once(), |_| Ok(()));
        assert!(matches!(result, Err(VariantError::PoolNotFound(_))));
    }

    #[test]
    fn test_transact_error_does_not_write() {
        let store = InMemoryPoolStore::new();
        store.commit(&Pool::new(key(), Utc::now())).unwrap();
        let result: VariantResult<()> = transact(&store, &key(), RetryPolicy::once(), |pool| {
            pool.bandit.record(uuid::Uuid::new_v4(), 1.0);
            Err(VariantError::Validation("abort".into()))
        });
        assert!(result.is_err());
        let pool = store.load(&key()).unwrap().unwrap();
        assert_eq!(pool.version, 1);
        assert_eq!(pool.bandit.total_trials(), 0);
    }

    #[test]
    fn test_concurrent_transactions_lose_no_updates() {
        let store = Arc::new(InMemoryPoolStore::new());
        store.commit(&Pool::new(key(), Utc::now())).unwrap();
        let arm = uuid::Uuid::new_v4();
        let retry = RetryPolicy {
            max_attempts: 1_000,
            backoff: Duration::ZERO,
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        transact(store.as_ref(), &key(), retry, |pool| {
                            pool.bandit.record(arm, 1.0);
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let pool = store.load(&key()).unwrap().unwrap();
        assert_eq!(pool.bandit.arm(&arm).trials, 400);
        assert_eq!(pool.version, 401);
    }
}
