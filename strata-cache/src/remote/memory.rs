use super::backend::RemoteBackend;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// In-process stand-in for a remote store.
///
/// Useful for local development and tests: it can be taken offline and can
/// add latency to every call. It has no native expiry, so TTLs are enforced by
/// the envelope check in [`super::RemoteCache`].
pub struct MemoryBackend {
    data: RwLock<HashMap<String, Vec<u8>>>,
    online: AtomicBool,
    /// Injected latency per call in milliseconds (0 = none)
    latency_ms: AtomicU64,
    calls: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total calls received, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored bytes (the encoded envelope)
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    async fn simulate(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    fn supports_expiry(&self) -> bool {
        false
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.simulate().await?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        self.simulate().await?;
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.simulate().await?;
        Ok(self.data.write().remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.simulate().await?;
        self.data.write().clear();
        Ok(())
    }
}
