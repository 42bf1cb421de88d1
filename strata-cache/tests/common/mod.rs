//! Common test utilities

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use mockito::{Server, ServerGuard};
use std::sync::Arc;
use std::time::Duration;
use strata_cache::{
    CacheManager, CacheStore, ConnectionConfig, HttpBackend, LocalCache, LocalCacheConfig,
    MemoryBackend, RemoteCache, RemoteCacheConfig,
};

/// L1 + in-memory L2 wired into a manager
#[allow(dead_code)] // Used by other test modules
pub struct TwoTier {
    pub manager: Arc<CacheManager>,
    pub local: Arc<LocalCache>,
    pub remote: Arc<RemoteCache>,
    pub backend: Arc<MemoryBackend>,
}

#[allow(dead_code)]
pub fn two_tier(local: LocalCacheConfig, remote: RemoteCacheConfig) -> TwoTier {
    let backend = Arc::new(MemoryBackend::new());
    let local = Arc::new(LocalCache::new(local).unwrap());
    let remote = Arc::new(RemoteCache::new(backend.clone(), &remote).unwrap());
    let manager = CacheManager::builder()
        .tier(local.clone())
        .tier(remote.clone())
        .build()
        .unwrap();
    TwoTier {
        manager: Arc::new(manager),
        local,
        remote,
        backend,
    }
}

#[allow(dead_code)]
pub fn default_two_tier() -> TwoTier {
    two_tier(LocalCacheConfig::default(), RemoteCacheConfig::default())
}

/// Setup a remote tier pointing to a mock Synap server
#[allow(dead_code)]
pub async fn setup_http_cache(auth_token: Option<&str>) -> (RemoteCache, ServerGuard) {
    let server = Server::new_async().await;
    let mut connection = ConnectionConfig::new(server.url()).with_timeout(Duration::from_secs(5));
    if let Some(token) = auth_token {
        connection = connection.with_auth_token(token);
    }
    let backend = Arc::new(HttpBackend::new(&connection).unwrap());
    let cache = RemoteCache::new(backend, &RemoteCacheConfig::default()).unwrap();
    (cache, server)
}

/// Encoded envelope for `value`, as the server would hand it back from `kv.get`
/// (base64, then JSON-quoted)
#[allow(dead_code)]
pub async fn server_stored_value(value: &'static [u8]) -> String {
    let backend = Arc::new(MemoryBackend::new());
    let cache = RemoteCache::new(backend.clone(), &RemoteCacheConfig::default()).unwrap();
    assert!(cache.set("tmp", bytes::Bytes::from_static(value), None).await);
    let raw = backend.raw("tmp").unwrap();
    serde_json::to_string(&BASE64.encode(raw)).unwrap()
}
