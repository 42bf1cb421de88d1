//! L2 remote cache
//!
//! Wraps a [`RemoteBackend`] with envelope encoding, optional compression,
//! per-call timeouts and fail-open semantics: any failure on the read path is
//! a miss, any failure on the write path is `false`.

pub mod backend;
pub mod http;
pub mod memory;

pub use backend::RemoteBackend;
pub use http::{ConnectionConfig, HttpBackend};
pub use memory::MemoryBackend;

use crate::compression::{CompressionAlgorithm, CompressionConfig, Compressor};
use crate::error::{CacheError, Result};
use crate::store::CacheStore;
use crate::types::{MAX_TTL, TierStats, resolve_ttl};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const ENVELOPE_VERSION: u8 = 1;

/// L2 tier configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteCacheConfig {
    pub default_ttl_secs: u64,
    /// Upper bound on every backend call; exceeding it is a miss
    pub operation_timeout_ms: u64,
    pub compression: CompressionConfig,
    /// `None` keeps the tier in-process (development/testing)
    pub connection: Option<ConnectionConfig>,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            operation_timeout_ms: 2000,
            compression: CompressionConfig::default(),
            connection: None,
        }
    }
}

impl RemoteCacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 {
            return Err(CacheError::InvalidTtl(
                "remote.default_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.default_ttl_secs > MAX_TTL.as_secs() {
            return Err(CacheError::InvalidTtl(format!(
                "remote.default_ttl_secs must be at most {}",
                MAX_TTL.as_secs()
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(CacheError::Config(
                "remote.operation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.compression.validate()
    }
}

/// Serialized form of a value on the remote store
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u8,
    compression: CompressionAlgorithm,
    created_at_ms: i64,
    /// Wall-clock expiry, checked on read for backends without native TTL
    expires_at_ms: i64,
    payload: Vec<u8>,
}

#[derive(Default)]
struct RemoteStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    errors: AtomicU64,
}

/// Network-backed tier
pub struct RemoteCache {
    name: String,
    backend: Arc<dyn RemoteBackend>,
    compressor: Compressor,
    default_ttl: Duration,
    timeout: Duration,
    stats: RemoteStats,
}

impl RemoteCache {
    /// Create a new L2 cache named `l2`
    pub fn new(backend: Arc<dyn RemoteBackend>, config: &RemoteCacheConfig) -> Result<Self> {
        Self::with_name("l2", backend, config)
    }

    pub fn with_name(
        name: impl Into<String>,
        backend: Arc<dyn RemoteBackend>,
        config: &RemoteCacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            backend,
            compressor: Compressor::new(config.compression.clone())?,
            default_ttl: config.default_ttl(),
            timeout: config.operation_timeout(),
            stats: RemoteStats::default(),
        })
    }

    /// Build the tier from config: HTTP when connection parameters are set,
    /// otherwise an in-process [`MemoryBackend`]
    pub fn from_config(config: &RemoteCacheConfig) -> Result<Self> {
        let backend: Arc<dyn RemoteBackend> = match config.connection {
            Some(ref connection) => Arc::new(HttpBackend::new(connection)?),
            None => Arc::new(MemoryBackend::new()),
        };
        Self::new(backend, config)
    }

    pub fn backend(&self) -> &Arc<dyn RemoteBackend> {
        &self.backend
    }

    fn encode(&self, value: &[u8], ttl: Duration) -> Result<Vec<u8>> {
        let (compression, payload) = self.compressor.compress(value)?;
        let now = chrono::Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            compression,
            created_at_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms),
            payload,
        };
        Ok(bincode::serde::encode_to_vec(
            &envelope,
            bincode::config::standard(),
        )?)
    }

    /// Decode an envelope; `Ok(None)` means the value is expired
    fn decode(&self, raw: &[u8]) -> Result<Option<Bytes>> {
        let (envelope, _): (Envelope, usize) =
            bincode::serde::decode_from_slice(raw, bincode::config::standard())?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(CacheError::Serialization(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        if chrono::Utc::now().timestamp_millis() >= envelope.expires_at_ms {
            return Ok(None);
        }

        let payload = self
            .compressor
            .decompress(&envelope.payload, envelope.compression)?;
        Ok(Some(Bytes::from(payload)))
    }

    /// Run a backend call under the tier timeout
    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    fn record_error(&self, operation: &str, key: &str, error: &CacheError) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            tier = %self.name,
            "L2 {} failed for key {}: {}",
            operation,
            key,
            error
        );
    }
}

#[async_trait]
impl CacheStore for RemoteCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Option<Bytes> {
        let raw = match self.call(self.backend.get_raw(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!("L2 Cache MISS for key: {}", key);
                return None;
            }
            Err(e) => {
                self.record_error("get", key, &e);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match self.decode(&raw) {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!("L2 Cache HIT for key: {}", key);
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                debug!("L2 Cache EXPIRED for key: {}", key);
                None
            }
            Err(e) => {
                self.record_error("decode", key, &e);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        let ttl = resolve_ttl(ttl, self.default_ttl);
        let encoded = match self.encode(&value, ttl) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.record_error("encode", key, &e);
                return false;
            }
        };

        let remote_ttl = self.backend.supports_expiry().then_some(ttl);
        let size = encoded.len();
        match self.call(self.backend.set_raw(key, encoded, remote_ttl)).await {
            Ok(()) => {
                debug!(
                    "L2 Cache PUT: {} ({} → {} bytes, ttl={:?})",
                    key,
                    value.len(),
                    size,
                    ttl
                );
                true
            }
            Err(e) => {
                self.record_error("set", key, &e);
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match self.call(self.backend.delete(key)).await {
            Ok(existed) => existed,
            Err(e) => {
                self.record_error("delete", key, &e);
                false
            }
        }
    }

    async fn clear(&self) -> bool {
        match self.call(self.backend.clear()).await {
            Ok(()) => true,
            Err(e) => {
                self.record_error("clear", "*", &e);
                false
            }
        }
    }

    async fn contains_key(&self, key: &str) -> bool {
        match self.call(self.backend.get_raw(key)).await {
            Ok(None) => false,
            Ok(Some(raw)) => !matches!(self.decode(&raw), Ok(None)),
            // Unreachable backend: assume the key is still there
            Err(_) => true,
        }
    }

    fn stats(&self) -> TierStats {
        TierStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            entries: None,
            evictions: 0,
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}
