use crate::error::{CacheError, Result};
use crate::local::{LocalCache, LocalCacheConfig};
use crate::manager::CacheManager;
use crate::remote::{RemoteCache, RemoteCacheConfig};
use crate::warmer::{JsonFileSource, KeyRule, WarmingStrategy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub local: LocalCacheConfig,
    pub remote: RemoteCacheConfig,
    pub logging: LoggingConfig,
    pub warming: Vec<WarmingEntry>,
    /// Re-run the warming strategies on this period (disabled when `None`)
    pub warming_interval_secs: Option<u64>,
    pub stats_interval_secs: u64,
    /// Bounded size of the manager's recent-operation log
    pub operation_log_capacity: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// File-backed warming strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarmingEntry {
    pub name: String,
    /// JSON object `{id: value}`
    pub path: PathBuf,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local: LocalCacheConfig::default(),
            remote: RemoteCacheConfig::default(),
            logging: LoggingConfig::default(),
            warming: Vec::new(),
            warming_interval_secs: None,
            stats_interval_secs: 60,
            operation_log_capacity: 1024,
        }
    }
}

/// Tiers and manager built from a [`CacheConfig`]
pub struct CacheStack {
    pub manager: Arc<CacheManager>,
    pub local: Arc<LocalCache>,
    pub remote: Arc<RemoteCache>,
}

impl CacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.local.validate()?;
        self.remote.validate()?;

        if self.stats_interval_secs == 0 {
            return Err(CacheError::Config(
                "stats_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.warming_interval_secs == Some(0) {
            return Err(CacheError::Config(
                "warming_interval_secs must be greater than zero".to_string(),
            ));
        }
        for entry in &self.warming {
            if entry.name.is_empty() {
                return Err(CacheError::Config(
                    "warming entries need a name".to_string(),
                ));
            }
            if entry.ttl_secs == Some(0) {
                return Err(CacheError::InvalidTtl(format!(
                    "warming '{}' ttl_secs must be greater than zero",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn warming_interval(&self) -> Option<Duration> {
        self.warming_interval_secs.map(Duration::from_secs)
    }

    /// Build L1, L2 and the manager over them (L1 first)
    pub fn build(&self) -> Result<CacheStack> {
        self.validate()?;

        let local = Arc::new(LocalCache::new(self.local.clone())?);
        let remote = Arc::new(RemoteCache::from_config(&self.remote)?);
        let manager = CacheManager::builder()
            .tier(local.clone())
            .tier(remote.clone())
            .operation_log_capacity(self.operation_log_capacity)
            .build()?;

        Ok(CacheStack {
            manager: Arc::new(manager),
            local,
            remote,
        })
    }

    /// Warming strategies for the configured files
    pub fn warming_strategies(&self) -> Vec<WarmingStrategy> {
        self.warming
            .iter()
            .map(|entry| {
                let mut strategy = WarmingStrategy::new(
                    entry.name.clone(),
                    Arc::new(JsonFileSource::new(&entry.path)),
                    KeyRule::Prefix(entry.key_prefix.clone()),
                )
                .with_tags(entry.tags.clone());
                if let Some(ttl) = entry.ttl_secs {
                    strategy = strategy.with_ttl(Duration::from_secs(ttl));
                }
                strategy
            })
            .collect()
    }
}
