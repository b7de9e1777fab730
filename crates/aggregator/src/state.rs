//! Short-TTL aggregation cache
//!
//! Uses DashMap for concurrent access. Entries are fresh for `fresh_for`,
//! readable as stale until `evict_after`, and purged on access after that.
//! There is no request coalescing: two concurrent misses both aggregate.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use holdings_core::{OwnerId, ResultCacheSettings};

use crate::result::AggregateResult;

/// Owner plus source-set fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub owner: OwnerId,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(owner: &OwnerId, fingerprint: &str) -> Self {
        Self {
            owner: owner.clone(),
            fingerprint: fingerprint.to_string(),
        }
    }
}

/// Timestamped result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: AggregateResult,
    pub stored_at_ms: u64,
}

impl CacheEntry {
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.stored_at_ms))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(AggregateResult),
    Stale(AggregateResult),
    Miss,
}

impl CacheLookup {
    pub fn into_result(self) -> Option<AggregateResult> {
        match self {
            CacheLookup::Fresh(r) | CacheLookup::Stale(r) => Some(r),
            CacheLookup::Miss => None,
        }
    }
}

#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    fresh_for: Duration,
    evict_after: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(fresh_for: Duration, evict_after: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            fresh_for,
            evict_after: evict_after.max(fresh_for),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &ResultCacheSettings) -> Self {
        Self::new(settings.fresh_for(), settings.evict_after())
    }

    pub fn lookup(&self, key: &CacheKey, now_ms: u64) -> CacheLookup {
        let Some(entry) = self.entries.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Miss;
        };

        let age = entry.age(now_ms);
        if age <= self.fresh_for {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Fresh(entry.result.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if age <= self.evict_after {
            return CacheLookup::Stale(entry.result.clone());
        }

        drop(entry); // Release read lock before removing
        let evict_after = self.evict_after;
        self.entries.remove_if(key, |_, e| e.age(now_ms) > evict_after);
        CacheLookup::Miss
    }

    pub fn insert(&self, key: CacheKey, result: AggregateResult, now_ms: u64) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                stored_at_ms: now_ms,
            },
        );
    }

    /// Drop every entry for `owner`, whatever its fingerprint
    pub fn invalidate_owner(&self, owner: &OwnerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| &k.owner != owner);
        before.saturating_sub(self.entries.len())
    }

    /// Purge entries past the eviction window
    pub fn cleanup(&self, now_ms: u64) {
        let evict_after = self.evict_after;
        self.entries.retain(|_, e| e.age(now_ms) <= evict_after);
    }

    pub fn stats(&self, now_ms: u64) -> ResultCacheStats {
        let fresh = self
            .entries
            .iter()
            .filter(|e| e.value().age(now_ms) <= self.fresh_for)
            .count();

        ResultCacheStats {
            entry_count: self.entries.len(),
            fresh_count: fresh,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::from_settings(&ResultCacheSettings::default())
    }
}

#[derive(Debug, Clone)]
pub struct ResultCacheStats {
    pub entry_count: usize,
    pub fresh_count: usize,
    pub hits: u64,
    pub misses: u64,
}
