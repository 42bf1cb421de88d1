//! Cache warming
//!
//! A [`WarmingStrategy`] pulls records from a [`WarmingSource`] and writes
//! them through the manager under keys derived by its [`KeyRule`].

use crate::manager::CacheManager;
use crate::task::PeriodicTask;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// One record to preload
#[derive(Debug, Clone, PartialEq)]
pub struct WarmRecord {
    pub id: String,
    pub value: Bytes,
}

impl WarmRecord {
    pub fn new(id: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

/// Where warming records come from
#[async_trait]
pub trait WarmingSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<WarmRecord>>;
}

/// Maps a record id to a cache key
#[derive(Clone)]
pub enum KeyRule {
    /// `{prefix}{id}`
    Prefix(String),
    /// Template with an `{id}` placeholder, e.g. `user:{id}:profile`
    Template(String),
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl KeyRule {
    pub fn key_for(&self, id: &str) -> String {
        match self {
            Self::Prefix(prefix) => format!("{}{}", prefix, id),
            Self::Template(template) => template.replace("{id}", id),
            Self::Custom(f) => f(id),
        }
    }
}

impl fmt::Debug for KeyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            Self::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Clone)]
pub struct WarmingStrategy {
    pub name: String,
    pub source: Arc<dyn WarmingSource>,
    pub key_rule: KeyRule,
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl WarmingStrategy {
    pub fn new(name: impl Into<String>, source: Arc<dyn WarmingSource>, key_rule: KeyRule) -> Self {
        Self {
            name: name.into(),
            source,
            key_rule,
            ttl: None,
            tags: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of one strategy run
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyReport {
    pub name: String,
    /// Records returned by the source
    pub loaded: usize,
    /// Records accepted by at least one tier
    pub stored: usize,
    pub duration_ms: u64,
    /// Set when the source failed and the strategy was skipped
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmingReport {
    pub strategies: Vec<StrategyReport>,
}

impl WarmingReport {
    pub fn total_stored(&self) -> usize {
        self.strategies.iter().map(|s| s.stored).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StrategyReport> {
        self.strategies.iter().filter(|s| s.error.is_some())
    }

    pub fn strategy(&self, name: &str) -> Option<&StrategyReport> {
        self.strategies.iter().find(|s| s.name == name)
    }
}

#[derive(Clone)]
pub struct CacheWarmer {
    manager: Arc<CacheManager>,
}

impl CacheWarmer {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Run strategies in order; a failing one is logged and skipped
    pub async fn run(&self, strategies: &[WarmingStrategy]) -> WarmingReport {
        let mut report = WarmingReport::default();

        for strategy in strategies {
            let started = Instant::now();
            let mut entry = StrategyReport {
                name: strategy.name.clone(),
                ..Default::default()
            };

            match strategy.source.fetch().await {
                Ok(records) => {
                    entry.loaded = records.len();
                    for record in records {
                        let key = strategy.key_rule.key_for(&record.id);
                        let outcome = self
                            .manager
                            .set_with_tags(&key, record.value, strategy.ttl, &strategy.tags)
                            .await;
                        if outcome.success() {
                            entry.stored += 1;
                        }
                    }
                    info!(
                        "Warmed {} of {} records for strategy '{}'",
                        entry.stored, entry.loaded, strategy.name
                    );
                }
                Err(e) => {
                    error!("Warming strategy '{}' failed: {:#}", strategy.name, e);
                    entry.error = Some(format!("{:#}", e));
                }
            }

            entry.duration_ms = started.elapsed().as_millis() as u64;
            report.strategies.push(entry);
        }

        report
    }

    /// Re-run `strategies` every `interval`
    pub fn spawn_periodic(&self, strategies: Vec<WarmingStrategy>, interval: Duration) -> PeriodicTask {
        let warmer = self.clone();
        let strategies = Arc::new(strategies);
        PeriodicTask::spawn("cache-warmer", interval, move || {
            let warmer = warmer.clone();
            let strategies = Arc::clone(&strategies);
            async move {
                warmer.run(&strategies).await;
            }
        })
    }
}

/// Reads a JSON object `{id: value}` from disk on every fetch.
///
/// Each value is stored as its JSON encoding, so it reads back with
/// [`CacheManager::get_json`].
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl WarmingSource for JsonFileSource {
    async fn fetch(&self) -> anyhow::Result<Vec<WarmRecord>> {
        use anyhow::Context;

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading warming file {}", self.path.display()))?;
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&content)
            .with_context(|| format!("parsing warming file {}", self.path.display()))?;

        object
            .into_iter()
            .map(|(id, value)| -> anyhow::Result<WarmRecord> {
                Ok(WarmRecord::new(id, serde_json::to_vec(&value)?))
            })
            .collect()
    }
}
