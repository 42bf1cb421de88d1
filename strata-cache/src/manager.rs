//! Multi-tier cache manager
//!
//! Tiers are ordered fastest first. Reads walk the tiers and back-fill every
//! faster tier on a hit; writes fan out to every tier. Tier failures never
//! surface here: a failing tier is simply a miss or a `false` in the
//! [`WriteOutcome`].

use crate::error::{CacheError, Result};
use crate::metrics::{self, OperationLog};
use crate::store::CacheStore;
use crate::task::PeriodicTask;
use crate::types::{CacheOperationMetric, Operation, TierStats};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_OPERATION_LOG_CAPACITY: usize = 1024;
const DEFAULT_TAG_PRUNE_THRESHOLD: usize = 4096;

/// Result of one tier write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierWrite {
    pub tier: String,
    pub success: bool,
}

/// Per-tier results of a fan-out write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub tiers: Vec<TierWrite>,
}

impl WriteOutcome {
    /// True when at least one tier accepted the write
    pub fn success(&self) -> bool {
        self.tiers.iter().any(|t| t.success)
    }

    pub fn all_succeeded(&self) -> bool {
        !self.tiers.is_empty() && self.tiers.iter().all(|t| t.success)
    }

    /// Result for a named tier
    pub fn tier(&self, name: &str) -> Option<bool> {
        self.tiers
            .iter()
            .find(|t| t.tier == name)
            .map(|t| t.success)
    }
}

/// Per-tier statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TierReport {
    pub name: String,
    pub stats: TierStats,
    pub hit_ratio: f64,
}

/// Aggregated statistics across all tiers
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub tiers: Vec<TierReport>,
    /// `get` calls served by the manager
    pub requests: u64,
    /// Requests answered by any tier
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

impl ManagerStats {
    pub fn tier(&self, name: &str) -> Option<&TierReport> {
        self.tiers.iter().find(|t| t.name == name)
    }
}

#[derive(Default)]
struct KeyTags {
    tags: HashSet<String>,
    /// Bumped on every `tag` call, so a prune can tell a re-tagged key apart
    generation: u64,
}

#[derive(Default)]
struct TagState {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, KeyTags>,
    next_generation: u64,
}

impl TagState {
    fn detach(&mut self, key: &str, tags: HashSet<String>) {
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }
}

/// Side index of tag -> keys, owned by the manager rather than the tiers.
///
/// Keys evicted by a tier stay indexed until deleted, invalidated or pruned
/// by [`CacheManager::prune_tags`] once no tier holds them.
#[derive(Default)]
pub struct TagIndex {
    state: RwLock<TagState>,
}

impl TagIndex {
    pub fn tag<S: AsRef<str>>(&self, key: &str, tags: &[S]) {
        if tags.is_empty() {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.next_generation += 1;
        let entry = state.by_key.entry(key.to_string()).or_default();
        entry.generation = state.next_generation;
        for tag in tags {
            let tag = tag.as_ref();
            state
                .by_tag
                .entry(tag.to_string())
                .or_default()
                .insert(key.to_string());
            entry.tags.insert(tag.to_string());
        }
    }

    /// Forget every tag association of `key`
    pub fn untag_key(&self, key: &str) {
        let mut state = self.state.write();
        if let Some(entry) = state.by_key.remove(key) {
            state.detach(key, entry.tags);
        }
    }

    /// `untag_key`, unless `key` was tagged again after `generation`
    fn untag_if_unchanged(&self, key: &str, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.by_key.get(key).map(|entry| entry.generation) != Some(generation) {
            return false;
        }
        if let Some(entry) = state.by_key.remove(key) {
            state.detach(key, entry.tags);
        }
        true
    }

    /// Every indexed key with its current generation
    fn snapshot(&self) -> Vec<(String, u64)> {
        self.state
            .read()
            .by_key
            .iter()
            .map(|(key, entry)| (key.clone(), entry.generation))
            .collect()
    }

    /// Remove a tag and return the keys that were recorded under it
    pub fn take_tag(&self, tag: &str) -> Vec<String> {
        let mut state = self.state.write();
        let Some(keys) = state.by_tag.remove(tag) else {
            return Vec::new();
        };
        for key in &keys {
            if let Some(entry) = state.by_key.get_mut(key) {
                entry.tags.remove(tag);
                if entry.tags.is_empty() {
                    state.by_key.remove(key);
                }
            }
        }
        keys.into_iter().collect()
    }

    pub fn keys_for(&self, tag: &str) -> Vec<String> {
        self.state
            .read()
            .by_tag
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tags_for(&self, key: &str) -> Vec<String> {
        self.state
            .read()
            .by_key
            .get(key)
            .map(|entry| entry.tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of tagged keys
    pub fn len(&self) -> usize {
        self.state.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.by_tag.clear();
        state.by_key.clear();
    }
}

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder {
    tiers: Vec<Arc<dyn CacheStore>>,
    operation_log_capacity: usize,
    tag_prune_threshold: usize,
}

impl CacheManagerBuilder {
    /// Append a tier; add tiers fastest first
    pub fn tier(mut self, tier: Arc<dyn CacheStore>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// How many recent operation records to keep (0 disables the log)
    pub fn operation_log_capacity(mut self, capacity: usize) -> Self {
        self.operation_log_capacity = capacity;
        self
    }

    /// Tagged-key count that triggers a prune of keys no tier holds
    pub fn tag_prune_threshold(mut self, threshold: usize) -> Self {
        self.tag_prune_threshold = threshold;
        self
    }

    pub fn build(self) -> Result<CacheManager> {
        if self.tiers.is_empty() {
            return Err(CacheError::Config(
                "cache manager needs at least one tier".to_string(),
            ));
        }
        if self.tag_prune_threshold == 0 {
            return Err(CacheError::Config(
                "tag_prune_threshold must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for tier in &self.tiers {
            if !names.insert(tier.name().to_string()) {
                return Err(CacheError::Config(format!(
                    "duplicate tier name '{}'",
                    tier.name()
                )));
            }
        }

        info!(
            "Initializing cache manager with tiers [{}]",
            self.tiers
                .iter()
                .map(|t| t.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(CacheManager {
            tiers: self.tiers,
            tags: TagIndex::default(),
            operations: OperationLog::new(self.operation_log_capacity),
            tag_prune_threshold: self.tag_prune_threshold,
            next_tag_prune: AtomicUsize::new(self.tag_prune_threshold),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }
}

/// Orchestrates an ordered list of cache tiers
pub struct CacheManager {
    tiers: Vec<Arc<dyn CacheStore>>,
    tags: TagIndex,
    operations: OperationLog,
    tag_prune_threshold: usize,
    /// Index size at which the next tagged write prunes
    next_tag_prune: AtomicUsize,
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder {
            tiers: Vec::new(),
            operation_log_capacity: DEFAULT_OPERATION_LOG_CAPACITY,
            tag_prune_threshold: DEFAULT_TAG_PRUNE_THRESHOLD,
        }
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheStore>] {
        &self.tiers
    }

    pub fn tier(&self, name: &str) -> Option<&Arc<dyn CacheStore>> {
        self.tiers.iter().find(|t| t.name() == name)
    }

    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    fn observe(
        &self,
        tier: &dyn CacheStore,
        operation: Operation,
        key: &str,
        hit: bool,
        started: Instant,
        payload_size: usize,
    ) {
        let metric = CacheOperationMetric {
            tier_name: tier.name().to_string(),
            operation,
            key: key.to_string(),
            hit,
            latency: started.elapsed(),
            payload_size,
            timestamp: chrono::Utc::now(),
        };
        metrics::record_operation(&metric);
        self.operations.push(metric);
    }

    /// Look a key up tier by tier, promoting a hit into every faster tier
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        for (index, tier) in self.tiers.iter().enumerate() {
            let started = Instant::now();
            let value = tier.get(key).await;
            let size = value.as_ref().map_or(0, |v| v.len());
            self.observe(tier.as_ref(), Operation::Get, key, value.is_some(), started, size);

            let Some(value) = value else {
                continue;
            };

            for faster in &self.tiers[..index] {
                let started = Instant::now();
                let ok = faster.set(key, value.clone(), None).await;
                self.observe(faster.as_ref(), Operation::Backfill, key, ok, started, size);
                if !ok {
                    warn!("Back-fill of key {} into tier {} failed", key, faster.name());
                }
            }
            if index > 0 {
                debug!("Promoted key {} from tier {}", key, tier.name());
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write to every tier; a failing tier does not stop the others
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> WriteOutcome {
        let size = value.len();
        let mut outcome = WriteOutcome::default();

        for tier in &self.tiers {
            let started = Instant::now();
            let success = tier.set(key, value.clone(), ttl).await;
            self.observe(tier.as_ref(), Operation::Set, key, success, started, size);
            if !success {
                warn!("Write of key {} to tier {} failed", key, tier.name());
            }
            outcome.tiers.push(TierWrite {
                tier: tier.name().to_string(),
                success,
            });
        }

        outcome
    }

    /// `set`, then record the key under each tag.
    ///
    /// Once the index outgrows its prune mark, keys no tier holds any more
    /// are dropped from it.
    pub async fn set_with_tags<S: AsRef<str>>(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &[S],
    ) -> WriteOutcome {
        let outcome = self.set(key, value, ttl).await;
        if outcome.success() {
            self.tags.tag(key, tags);
            if self.tags.len() > self.next_tag_prune.load(Ordering::Relaxed) {
                self.prune_tags().await;
            }
        }
        outcome
    }

    /// Drop tag entries for keys that no tier holds, returning how many
    pub async fn prune_tags(&self) -> usize {
        let snapshot = self.tags.snapshot();
        // Keep concurrent tagged writes from starting a second prune
        self.next_tag_prune.store(
            snapshot.len().saturating_mul(2).max(self.tag_prune_threshold),
            Ordering::Relaxed,
        );

        let mut pruned = 0;
        for (key, generation) in snapshot {
            if self.held_by_any_tier(&key).await {
                continue;
            }
            if self.tags.untag_if_unchanged(&key, generation) {
                pruned += 1;
            }
        }

        let remaining = self.tags.len();
        self.next_tag_prune.store(
            remaining.saturating_mul(2).max(self.tag_prune_threshold),
            Ordering::Relaxed,
        );
        debug!("Pruned {} tagged keys, {} remain", pruned, remaining);
        pruned
    }

    async fn held_by_any_tier(&self, key: &str) -> bool {
        for tier in &self.tiers {
            if tier.contains_key(key).await {
                return true;
            }
        }
        false
    }

    /// Delete from every tier; true if any tier held the key
    pub async fn delete(&self, key: &str) -> bool {
        let mut existed = false;
        for tier in &self.tiers {
            let started = Instant::now();
            let removed = tier.delete(key).await;
            self.observe(tier.as_ref(), Operation::Delete, key, removed, started, 0);
            existed |= removed;
        }
        self.tags.untag_key(key);
        existed
    }

    /// Clear every tier and the tag index; true if every tier succeeded
    pub async fn clear(&self) -> bool {
        let mut all_ok = true;
        for tier in &self.tiers {
            let started = Instant::now();
            let ok = tier.clear().await;
            self.observe(tier.as_ref(), Operation::Clear, "*", ok, started, 0);
            if !ok {
                warn!("Clear of tier {} failed", tier.name());
            }
            all_ok &= ok;
        }
        self.tags.clear();
        all_ok
    }

    /// Delete every key recorded under `tag`, returning how many existed
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let keys = self.tags.take_tag(tag);
        let mut removed = 0;
        for key in &keys {
            if self.delete(key).await {
                removed += 1;
            }
        }
        info!(
            "Invalidated tag '{}' ({} keys indexed, {} removed)",
            tag,
            keys.len(),
            removed
        );
        removed
    }

    /// Typed read; a payload that does not decode as `T` is a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cached value for key {} failed to decode: {}", key, e);
                None
            }
        }
    }

    /// Typed write
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.set(key, Bytes::from(bytes), ttl).await)
    }

    /// Aggregated per-tier and overall statistics
    pub fn stats(&self) -> ManagerStats {
        let tiers = self
            .tiers
            .iter()
            .map(|tier| {
                let stats = tier.stats();
                TierReport {
                    name: tier.name().to_string(),
                    hit_ratio: stats.hit_ratio(),
                    stats,
                }
            })
            .collect();

        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hit_ratio = if requests == 0 {
            0.0
        } else {
            hits as f64 / requests as f64
        };

        ManagerStats {
            tiers,
            requests,
            hits,
            misses,
            hit_ratio,
        }
    }

    /// Tail of the operation log, oldest first
    pub fn recent_operations(&self, n: usize) -> Vec<CacheOperationMetric> {
        self.operations.recent(n)
    }

    /// Log [`Self::stats`] every `interval`
    pub fn start_stats_reporter(self: &Arc<Self>, interval: Duration) -> PeriodicTask {
        let manager = Arc::clone(self);
        PeriodicTask::spawn("cache-stats-reporter", interval, move || {
            let manager = Arc::clone(&manager);
            async move {
                let stats = manager.stats();
                info!(
                    requests = stats.requests,
                    hits = stats.hits,
                    misses = stats.misses,
                    "Cache hit ratio {:.2}%",
                    stats.hit_ratio * 100.0
                );
                for tier in &stats.tiers {
                    info!(
                        tier = %tier.name,
                        hits = tier.stats.hits,
                        misses = tier.stats.misses,
                        evictions = tier.stats.evictions,
                        errors = tier.stats.errors,
                        "Tier hit ratio {:.2}%",
                        tier.hit_ratio * 100.0
                    );
                }
            }
        })
    }
}
