use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Longest TTL any tier honors; larger requests are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Entry stored by a single tier
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    /// Opaque payload, cheap to clone out of the tier
    pub value: Bytes,
    /// Entry is logically absent once `now >= expires_at`
    pub expires_at: Instant,
    pub created_at: Instant,
    /// Last access time (for LRU)
    pub last_accessed_at: Instant,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now (at most [`MAX_TTL`])
    pub fn new(key: impl Into<String>, value: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or_else(|| far_future(now));
        Self {
            key: key.into(),
            value,
            expires_at,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Update access time
    pub fn touch(&mut self, now: Instant) {
        self.last_accessed_at = now;
    }

    /// Remaining time to live, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Furthest instant after `now` (up to [`MAX_TTL`]) that does not overflow
fn far_future(now: Instant) -> Instant {
    let mut span = MAX_TTL;
    loop {
        if let Some(at) = now.checked_add(span) {
            return at;
        }
        if span.is_zero() {
            return now;
        }
        span /= 2;
    }
}

/// Resolve a caller-supplied TTL against a tier default.
///
/// `None` and a zero duration both mean "use the tier default". The result
/// never exceeds [`MAX_TTL`].
pub fn resolve_ttl(ttl: Option<Duration>, default: Duration) -> Duration {
    let ttl = match ttl {
        Some(ttl) if !ttl.is_zero() => ttl,
        _ => default,
    };
    ttl.min(MAX_TTL)
}

/// Per-tier statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    /// Live entry count, `None` when the tier cannot count cheaply
    pub entries: Option<usize>,
    pub evictions: u64,
    /// Entries removed because their TTL passed (lazy or swept)
    pub expirations: u64,
    /// Absorbed tier failures (timeouts, transport, decode)
    pub errors: u64,
}

impl TierStats {
    /// Calculate hit rate
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Tier operation kinds, used as metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    Set,
    Delete,
    Clear,
    Backfill,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::Backfill => "backfill",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability record emitted for every tier operation
#[derive(Debug, Clone, Serialize)]
pub struct CacheOperationMetric {
    pub tier_name: String,
    pub operation: Operation,
    pub key: String,
    /// Hit for reads, success for writes
    pub hit: bool,
    pub latency: Duration,
    pub payload_size: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
