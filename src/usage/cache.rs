//! Short-lived cache of month-to-date totals

use async_trait::async_trait;
use chrono::NaiveDate;
use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{MonthlyUsage, UsageError};

/// Cache key: one user, one calendar month
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonthKey {
    pub user_id: String,
    pub month_start: NaiveDate,
}

impl MonthKey {
    pub fn new(user_id: impl Into<String>, month_start: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            month_start,
        }
    }
}

/// Read-through cache in front of the usage store. Never authoritative.
///
/// Every `invalidate` advances the key's epoch. Callers read the epoch before querying
/// storage and hand it back to `put`, which refuses the figure if the key was
/// invalidated in between.
#[async_trait]
pub trait UsageCache: Send + Sync {
    async fn get(&self, key: &MonthKey) -> Result<Option<MonthlyUsage>, UsageError>;
    async fn epoch(&self, key: &MonthKey) -> Result<u64, UsageError>;
    /// Returns `false` when the figure was dropped as stale
    async fn put(
        &self,
        key: MonthKey,
        usage: MonthlyUsage,
        epoch: u64,
    ) -> Result<bool, UsageError>;
    async fn invalidate(&self, key: &MonthKey) -> Result<(), UsageError>;
}

const EPOCH_STRIPES: usize = 64;

/// In-process TTL cache
///
/// Epochs live in a fixed set of counters shared by hash, so unrelated keys may
/// occasionally skip a fill. Counters only grow.
#[derive(Clone)]
pub struct MokaUsageCache {
    cache: Cache<MonthKey, MonthlyUsage>,
    epochs: Arc<[AtomicU64; EPOCH_STRIPES]>,
}

impl MokaUsageCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            epochs: Arc::new(std::array::from_fn(|_| AtomicU64::new(0))),
        }
    }

    fn stripe(&self, key: &MonthKey) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let low_byte = hasher.finish().to_le_bytes()[0];
        &self.epochs[usize::from(low_byte) % EPOCH_STRIPES]
    }
}

impl Default for MokaUsageCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 10_000)
    }
}

#[async_trait]
impl UsageCache for MokaUsageCache {
    async fn get(&self, key: &MonthKey) -> Result<Option<MonthlyUsage>, UsageError> {
        Ok(self.cache.get(key).await)
    }

    async fn epoch(&self, key: &MonthKey) -> Result<u64, UsageError> {
        Ok(self.stripe(key).load(Ordering::SeqCst))
    }

    async fn put(
        &self,
        key: MonthKey,
        usage: MonthlyUsage,
        epoch: u64,
    ) -> Result<bool, UsageError> {
        let stripe = self.stripe(&key);
        if stripe.load(Ordering::SeqCst) != epoch {
            return Ok(false);
        }
        self.cache.insert(key.clone(), usage).await;
        // An invalidation that landed during the insert may have missed the new entry
        if stripe.load(Ordering::SeqCst) != epoch {
            self.cache.invalidate(&key).await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn invalidate(&self, key: &MonthKey) -> Result<(), UsageError> {
        self.stripe(key).fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate(key).await;
        Ok(())
    }
}
