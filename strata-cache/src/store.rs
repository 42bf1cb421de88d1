//! Tier contract
//!
//! Every cache tier (in-process or remote) implements [`CacheStore`]. Tiers
//! never return errors from the request path: absence is `None` and a failed
//! write is `false`.

use crate::types::TierStats;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Tier name, used in stats and metric labels
    fn name(&self) -> &str;

    /// Get a value. A missing or expired key is `None`.
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Store a value, replacing any existing entry.
    ///
    /// `ttl` of `None` or zero means the tier default.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> bool;

    /// Remove every entry. Maintenance only.
    async fn clear(&self) -> bool;

    /// Whether the tier may still hold `key`, without touching stats or
    /// recency. A tier that cannot tell answers `true`.
    async fn contains_key(&self, _key: &str) -> bool {
        true
    }

    fn stats(&self) -> TierStats;
}
