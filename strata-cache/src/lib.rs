pub mod compression;
pub mod config;
pub mod error;
pub mod local;
pub mod manager;
pub mod memoize;
pub mod metrics;
pub mod patterns;
pub mod remote;
pub mod store;
pub mod task;
pub mod types;
pub mod warmer;

// Re-export commonly used types
pub use compression::{CompressionAlgorithm, CompressionConfig, Compressor};
pub use config::{CacheConfig, CacheStack, LogFormat, LoggingConfig, WarmingEntry};
pub use error::{CacheError, Result};
pub use local::{LocalCache, LocalCacheConfig};
pub use manager::{CacheManager, CacheManagerBuilder, ManagerStats, TagIndex, TierReport, WriteOutcome};
pub use memoize::{KeyFn, MemoizeError, Memoized, Memoizer};
pub use patterns::{
    CacheAside, RecordWriter, WriteBehind, WriteBehindConfig, WriteBehindStats, WriteThrough,
};
pub use remote::{
    ConnectionConfig, HttpBackend, MemoryBackend, RemoteBackend, RemoteCache, RemoteCacheConfig,
};
pub use store::CacheStore;
pub use task::PeriodicTask;
pub use types::{CacheEntry, CacheOperationMetric, MAX_TTL, Operation, TierStats};
pub use warmer::{
    CacheWarmer, JsonFileSource, KeyRule, WarmRecord, WarmingReport, WarmingSource,
    WarmingStrategy,
};
