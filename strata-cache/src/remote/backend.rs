use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Client seam to an external keyed store.
///
/// Implementations move opaque bytes; envelope encoding, compression and
/// fail-open behaviour live in [`super::RemoteCache`].
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Whether `set_raw` applies the TTL on the remote side
    fn supports_expiry(&self) -> bool;

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;
}
