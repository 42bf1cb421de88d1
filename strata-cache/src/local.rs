//! L1 in-process cache
//!
//! Bounded LRU map with per-entry expiry. Every structural mutation (insert,
//! evict, delete, access bookkeeping) happens under one mutex per instance.

use crate::error::{CacheError, Result};
use crate::store::CacheStore;
use crate::task::PeriodicTask;
use crate::types::{CacheEntry, MAX_TTL, TierStats, resolve_ttl};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// L1 tier configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalCacheConfig {
    /// Hard cap on stored entries
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    /// Periodic expiry sweep, disabled when `None`
    pub sweep_interval_ms: Option<u64>,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_secs: 300,
            sweep_interval_ms: None,
        }
    }
}

impl LocalCacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::Config(
                "local.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.default_ttl_secs == 0 {
            return Err(CacheError::InvalidTtl(
                "local.default_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.default_ttl_secs > MAX_TTL.as_secs() {
            return Err(CacheError::InvalidTtl(format!(
                "local.default_ttl_secs must be at most {}",
                MAX_TTL.as_secs()
            )));
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(CacheError::Config(
                "local.sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

struct Slot {
    entry: CacheEntry,
    /// Position in the recency index
    seq: u64,
}

struct LruState {
    entries: HashMap<String, Slot>,
    /// Access sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
    stats: TierStats,
}

impl LruState {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot.entry)
    }

    /// Remove the least recently accessed entry to make room for an insert
    fn evict_one(&mut self, now: Instant) {
        let Some((_, key)) = self.order.pop_first() else {
            return;
        };
        if let Some(slot) = self.entries.remove(&key) {
            if slot.entry.is_expired_at(now) {
                self.stats.expirations += 1;
                debug!("L1 Cache EXPIRE (on insert): {}", key);
            } else {
                self.stats.evictions += 1;
                debug!("L1 Cache EVICT: {}", key);
            }
        }
    }
}

/// In-process LRU tier
pub struct LocalCache {
    name: String,
    config: LocalCacheConfig,
    state: Mutex<LruState>,
}

impl LocalCache {
    /// Create a new L1 cache named `l1`
    pub fn new(config: LocalCacheConfig) -> Result<Self> {
        Self::with_name("l1", config)
    }

    pub fn with_name(name: impl Into<String>, config: LocalCacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            state: Mutex::new(LruState {
                entries: HashMap::with_capacity(config.max_entries.min(4096)),
                order: BTreeMap::new(),
                next_seq: 0,
                stats: TierStats::default(),
            }),
            config,
        })
    }

    pub fn config(&self) -> &LocalCacheConfig {
        &self.config
    }

    /// Get value from cache
    pub fn get_entry(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = match state.entries.get(key) {
            Some(slot) => slot.entry.is_expired_at(now),
            None => {
                state.stats.misses += 1;
                debug!("L1 Cache MISS for key: {}", key);
                return None;
            }
        };

        if expired {
            state.remove(key);
            state.stats.misses += 1;
            state.stats.expirations += 1;
            debug!("L1 Cache EXPIRED for key: {}", key);
            return None;
        }

        let seq = state.bump();
        let slot = state.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut slot.seq, seq);
        slot.entry.touch(now);
        let value = slot.entry.value.clone();

        state.order.remove(&previous);
        state.order.insert(seq, key.to_string());
        state.stats.hits += 1;
        debug!("L1 Cache HIT for key: {}", key);

        Some(value)
    }

    /// Put value into cache
    pub fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let ttl = resolve_ttl(ttl, self.config.default_ttl());
        let now = Instant::now();
        let size = value.len();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.remove(key).is_none() && state.entries.len() >= self.config.max_entries {
            state.evict_one(now);
        }

        let seq = state.bump();
        state.entries.insert(
            key.to_string(),
            Slot {
                entry: CacheEntry::new(key, value, ttl),
                seq,
            },
        );
        state.order.insert(seq, key.to_string());

        assert!(
            state.entries.len() <= self.config.max_entries,
            "L1 capacity exceeded: {} > {}",
            state.entries.len(),
            self.config.max_entries
        );

        debug!("L1 Cache PUT: {} ({} bytes, ttl={:?})", key, size, ttl);
    }

    /// Delete value from cache
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.state.lock().remove(key).is_some();
        if removed {
            debug!("L1 Cache DELETE: {}", key);
        }
        removed
    }

    /// Invalidate (clear) entire cache
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.order.clear();
        debug!("L1 Cache INVALIDATE ALL ({} entries)", count);
    }

    /// Whether a live entry exists, without touching recency or stats
    pub fn contains(&self, key: &str) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired())
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        state.stats.expirations += expired.len() as u64;

        if !expired.is_empty() {
            debug!("L1 Cache purged {} expired entries", expired.len());
        }
        expired.len()
    }

    /// Start a background sweep that purges expired entries every `interval`
    pub fn start_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> PeriodicTask {
        let cache = Arc::clone(self);
        PeriodicTask::spawn(format!("{}-expiry-sweep", self.name), interval, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.purge_expired();
            }
        })
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> TierStats {
        let state = self.state.lock();
        TierStats {
            entries: Some(state.entries.len()),
            ..state.stats.clone()
        }
    }
}

#[async_trait]
impl CacheStore for LocalCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Option<Bytes> {
        self.get_entry(key)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        self.put(key, value, ttl);
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.remove(key)
    }

    async fn clear(&self) -> bool {
        self.invalidate_all();
        true
    }

    async fn contains_key(&self, key: &str) -> bool {
        self.contains(key)
    }

    fn stats(&self) -> TierStats {
        self.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: usize) -> LocalCache {
        LocalCache::new(LocalCacheConfig {
            max_entries,
            default_ttl_secs: 60,
            sweep_interval_ms: None,
        })
        .unwrap()
    }

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_cache_put_get() {
        let cache = cache(100);
        cache.put("key1", b("value"), Some(Duration::from_secs(60)));

        assert_eq!(cache.get_entry("key1"), Some(b("value")));

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, Some(1));
    }

    #[test]
    fn test_cache_miss() {
        let cache = cache(100);
        assert!(cache.get_entry("nonexistent").is_none());

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let cache = cache(2);
        cache.put("a", b("1"), None);
        cache.put("b", b("2"), None);
        cache.put("c", b("3"), None);

        assert!(cache.get_entry("a").is_none(), "a should be evicted");
        assert!(cache.get_entry("b").is_some());
        assert!(cache.get_entry("c").is_some());
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn test_access_refreshes_recency() {
        let cache = cache(2);
        cache.put("a", b("1"), None);
        cache.put("b", b("2"), None);

        cache.get_entry("a");
        cache.put("c", b("3"), None);

        assert!(cache.get_entry("a").is_some(), "a was accessed, should stay");
        assert!(cache.get_entry("b").is_none(), "b should be evicted");
        assert!(cache.get_entry("c").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = cache(2);
        cache.put("a", b("1"), None);
        cache.put("b", b("2"), None);
        cache.put("a", b("updated"), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_entry("a"), Some(b("updated")));
        assert!(cache.get_entry("b").is_some());
        assert_eq!(cache.get_stats().evictions, 0);
    }

    #[test]
    fn test_overwrite_refreshes_recency() {
        let cache = cache(2);
        cache.put("a", b("1"), None);
        cache.put("b", b("2"), None);
        cache.put("a", b("1b"), None);
        cache.put("c", b("3"), None);

        assert!(cache.get_entry("b").is_none());
        assert!(cache.get_entry("a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_expiration() {
        let cache = cache(100);
        cache.put("a", b("x"), Some(Duration::from_secs(1)));
        assert!(cache.get_entry("a").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(cache.get_entry("a").is_none());
        let stats = cache.get_stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.entries, Some(0), "expired entry removed on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_victim_counts_as_expiration() {
        let cache = cache(2);
        cache.put("short", b("1"), Some(Duration::from_secs(1)));
        cache.put("long", b("2"), None);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.put("new", b("3"), None);

        let stats = cache.get_stats();
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.expirations, 1);
        assert!(cache.contains("long"));
        assert!(cache.contains("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache(10);
        cache.put("a", b("1"), Some(Duration::from_secs(1)));
        cache.put("b", b("2"), Some(Duration::from_secs(1)));
        cache.put("c", b("3"), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_sweeper() {
        let cache = Arc::new(cache(10));
        cache.put("a", b("1"), Some(Duration::from_millis(500)));

        let sweeper = cache.start_expiry_sweeper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sweeper.stop().await;

        assert!(cache.is_empty());
        assert_eq!(cache.get_stats().expirations, 1);
    }

    #[test]
    fn test_contains_has_no_side_effects() {
        let cache = cache(2);
        cache.put("a", b("1"), None);
        cache.put("b", b("2"), None);

        assert!(cache.contains("a"));
        cache.put("c", b("3"), None);

        assert!(!cache.contains("a"), "contains must not refresh recency");
        let stats = cache.get_stats();
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[test]
    fn test_cache_delete() {
        let cache = cache(100);
        cache.put("key1", b("1"), None);

        assert!(cache.remove("key1"));
        assert!(!cache.remove("key1"));
        assert!(cache.get_entry("key1").is_none());
    }

    #[test]
    fn test_cache_invalidate_all() {
        let cache = cache(100);
        cache.put("key1", b("1"), None);
        cache.put("key2", b("2"), None);

        cache.invalidate_all();

        assert!(cache.is_empty());
        assert_eq!(cache.get_stats().entries, Some(0));
    }

    #[test]
    fn test_concurrent_writers_respect_bound() {
        let cache = Arc::new(cache(64));

        std::thread::scope(|scope| {
            for t in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    for i in 0..500 {
                        let key = format!("t{}-k{}", t, i);
                        cache.put(&key, Bytes::from(vec![t as u8; 8]), None);
                        cache.get_entry(&key);
                    }
                });
            }
        });

        assert_eq!(cache.len(), 64);
        assert_eq!(cache.get_stats().evictions, 8 * 500 - 64);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero_cap = LocalCache::new(LocalCacheConfig {
            max_entries: 0,
            ..Default::default()
        });
        assert!(matches!(zero_cap, Err(CacheError::Config(_))));

        let zero_ttl = LocalCache::new(LocalCacheConfig {
            default_ttl_secs: 0,
            ..Default::default()
        });
        assert!(matches!(zero_ttl, Err(CacheError::InvalidTtl(_))));

        let endless_ttl = LocalCache::new(LocalCacheConfig {
            default_ttl_secs: u64::MAX,
            ..Default::default()
        });
        assert!(matches!(endless_ttl, Err(CacheError::InvalidTtl(_))));
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let cache = cache(10);
        cache.put("k", b("v"), Some(Duration::from_secs(u64::MAX)));
        cache.put("m", b("w"), Some(Duration::MAX));

        assert_eq!(cache.get_entry("k"), Some(b("v")));
        assert_eq!(cache.get_entry("m"), Some(b("w")));
    }

    #[tokio::test]
    async fn test_store_trait_roundtrip() {
        let cache = cache(10);
        let store: &dyn CacheStore = &cache;

        assert!(store.set("k", b("v"), Some(Duration::from_secs(60))).await);
        assert_eq!(store.get("k").await, Some(b("v")));
        assert!(store.delete("k").await);
        assert!(store.clear().await);
        assert_eq!(store.name(), "l1");
    }
}
