//! Cache usage patterns composed over [`CacheManager`]
//!
//! - [`CacheAside`]: read from cache, load from origin on miss
//! - [`WriteThrough`]: write the system of record first, then the cache
//! - [`WriteBehind`]: write the cache now, persist asynchronously per-key FIFO

use crate::error::{CacheError, Result};
use crate::manager::{CacheManager, WriteOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Cache-aside (lazy loading)
pub struct CacheAside {
    manager: Arc<CacheManager>,
}

impl CacheAside {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Return the cached value or load, cache and return it.
    ///
    /// The loader receives the key. A loader error is returned as is; a
    /// loader `None` is not cached.
    pub async fn read<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> std::result::Result<Option<Bytes>, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<Option<Bytes>, E>>,
    {
        if let Some(value) = self.manager.get(key).await {
            return Ok(Some(value));
        }

        debug!("Cache-aside miss for key {}, loading from origin", key);
        let Some(value) = loader(key.to_string()).await? else {
            return Ok(None);
        };

        self.manager.set(key, value.clone(), ttl).await;
        Ok(Some(value))
    }
}

/// Write-through: the cache only ever holds values the origin accepted
pub struct WriteThrough {
    manager: Arc<CacheManager>,
}

impl WriteThrough {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Run `writer(key, value)` against the system of record, then cache
    pub async fn write<F, Fut, E>(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        writer: F,
    ) -> std::result::Result<WriteOutcome, E>
    where
        F: FnOnce(String, Bytes) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
    {
        writer(key.to_string(), value.clone()).await?;
        Ok(self.manager.set(key, value, ttl).await)
    }
}

/// System of record behind a [`WriteBehind`] queue
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write(&self, key: &str, value: Bytes) -> anyhow::Result<()>;
}

/// Write-behind queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WriteBehindConfig {
    /// Number of worker lanes; a key always maps to the same lane
    pub lanes: usize,
    /// Bounded queue depth per lane
    pub capacity: usize,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            capacity: 1024,
        }
    }
}

impl WriteBehindConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lanes == 0 {
            return Err(CacheError::Config(
                "write_behind.lanes must be greater than 0".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(CacheError::Config(
                "write_behind.capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Write-behind counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteBehindStats {
    pub queued: u64,
    pub written: u64,
    pub failed: u64,
}

impl WriteBehindStats {
    /// Records accepted but not yet written or failed
    pub fn pending(&self) -> u64 {
        self.queued.saturating_sub(self.written + self.failed)
    }
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

struct PendingRecord {
    key: String,
    value: Bytes,
}

#[derive(Clone)]
struct Lane {
    sender: mpsc::Sender<PendingRecord>,
    /// Held across the cache set and the enqueue so both happen in one order
    order: Arc<tokio::sync::Mutex<()>>,
}

/// Write-behind: cache first, origin asynchronously.
///
/// Records are routed by key hash onto a fixed set of lanes, each drained by
/// one worker. Concurrent writes on a lane take turns updating the cache and
/// enqueueing, so the cache and the writer see a key's values in the same
/// order.
pub struct WriteBehind {
    manager: Arc<CacheManager>,
    /// `None` once shut down
    lanes: RwLock<Option<Vec<Lane>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WriteBehind {
    /// Spawn the lane workers
    pub fn start(
        manager: Arc<CacheManager>,
        writer: Arc<dyn RecordWriter>,
        config: WriteBehindConfig,
    ) -> Result<Self> {
        config.validate()?;

        let counters = Arc::new(Counters::default());
        let mut lanes = Vec::with_capacity(config.lanes);
        let mut workers = Vec::with_capacity(config.lanes);

        for lane in 0..config.lanes {
            let (sender, rx) = mpsc::channel(config.capacity);
            lanes.push(Lane {
                sender,
                order: Arc::new(tokio::sync::Mutex::new(())),
            });
            workers.push(tokio::spawn(run_lane(
                lane,
                rx,
                Arc::clone(&writer),
                Arc::clone(&counters),
            )));
        }

        info!(
            "Write-behind started with {} lanes (capacity {})",
            config.lanes, config.capacity
        );

        Ok(Self {
            manager,
            lanes: RwLock::new(Some(lanes)),
            workers: Mutex::new(workers),
            counters,
        })
    }

    fn lane_for(&self, key: &str) -> Result<Lane> {
        let lanes = self.lanes.read();
        let lanes = lanes.as_ref().ok_or(CacheError::Closed)?;
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % lanes.len() as u64) as usize;
        Ok(lanes[index].clone())
    }

    /// Set in the cache and enqueue the record write.
    ///
    /// Waits for queue space when the key's lane is full.
    pub async fn write(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<WriteOutcome> {
        let lane = self.lane_for(key)?;
        let _turn = lane.order.lock().await;

        let outcome = self.manager.set(key, value.clone(), ttl).await;

        lane.sender
            .send(PendingRecord {
                key: key.to_string(),
                value,
            })
            .await
            .map_err(|_| CacheError::Closed)?;
        self.counters.queued.fetch_add(1, Ordering::Relaxed);

        Ok(outcome)
    }

    pub fn stats(&self) -> WriteBehindStats {
        WriteBehindStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.read().is_none()
    }

    /// Stop accepting writes, drain every lane and join the workers
    pub async fn shutdown(&self) -> WriteBehindStats {
        // Dropping the senders lets each worker finish its backlog and exit
        drop(self.lanes.write().take());
        let workers = std::mem::take(&mut *self.workers.lock());

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("Write-behind worker panicked: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "Write-behind shut down: {} written, {} failed",
            stats.written, stats.failed
        );
        stats
    }
}

async fn run_lane(
    lane: usize,
    mut rx: mpsc::Receiver<PendingRecord>,
    writer: Arc<dyn RecordWriter>,
    counters: Arc<Counters>,
) {
    debug!("Write-behind lane {} started", lane);

    while let Some(record) = rx.recv().await {
        match writer.write(&record.key, record.value).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(lane, "Write-behind write failed for key {}: {:#}", record.key, e);
            }
        }
    }

    debug!("Write-behind lane {} drained", lane);
}
