//! Memoization of async computations through the cache manager
//!
//! Keys have the form `memo:{name}:{digest}` where the digest is the SHA-256
//! of the arguments' canonical JSON. `serde_json` maps keep their keys sorted,
//! so map arguments digest the same regardless of insertion order.

use crate::manager::CacheManager;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Custom cache-key function; replaces the argument digest
pub type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

type FlightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A caller's membership in a key's flight.
///
/// The map entry lives exactly as long as some caller holds a `Flight` for
/// it, whether that caller returns, fails or is dropped mid-await.
struct Flight<'a> {
    flights: &'a FlightMap,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> Flight<'a> {
    fn join(flights: &'a FlightMap, key: &str) -> Self {
        let lock = Arc::clone(flights.lock().entry(key.to_string()).or_default());
        Self {
            flights,
            key: key.to_string(),
            lock,
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        // Release our handle under the map lock so the count below is exact
        drop(std::mem::take(&mut self.lock));
        if flights
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            flights.remove(&self.key);
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoizeError<E> {
    /// The arguments have no canonical JSON form (e.g. a map with non-string keys)
    #[error("Arguments cannot be canonicalized: {0}")]
    UnsupportedArguments(String),

    #[error("Computation failed: {0}")]
    Computation(E),
}

impl<E> MemoizeError<E> {
    pub fn into_computation(self) -> Option<E> {
        match self {
            Self::Computation(e) => Some(e),
            Self::UnsupportedArguments(_) => None,
        }
    }
}

/// SHA-256 hex digest of the canonical JSON of `args`
pub fn argument_digest<A: Serialize + ?Sized>(args: &A) -> Result<String, String> {
    let canonical = serde_json::to_value(args).map_err(|e| e.to_string())?;
    let encoded = serde_json::to_vec(&canonical).map_err(|e| e.to_string())?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// Factory for memoized functions sharing one manager
#[derive(Clone)]
pub struct Memoizer {
    manager: Arc<CacheManager>,
}

impl Memoizer {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Wrap `computation` so its results are cached under `name`.
    ///
    /// `ttl` of `None` uses each tier's default.
    pub fn wrap<A, F>(
        &self,
        name: impl Into<String>,
        ttl: Option<Duration>,
        key_fn: Option<KeyFn<A>>,
        computation: F,
    ) -> Memoized<A, F> {
        Memoized {
            manager: Arc::clone(&self.manager),
            name: name.into(),
            ttl,
            key_fn,
            computation,
            single_flight: false,
            flights: Mutex::new(HashMap::new()),
        }
    }
}

/// A memoized async function
pub struct Memoized<A, F> {
    manager: Arc<CacheManager>,
    name: String,
    ttl: Option<Duration>,
    key_fn: Option<KeyFn<A>>,
    computation: F,
    single_flight: bool,
    /// Per-key locks held while a single-flight miss is being computed
    flights: FlightMap,
}

impl<A, F> Memoized<A, F> {
    /// Run concurrent misses for the same key only once
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keys with a single-flight call in progress
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<A, F, Fut, R, E> Memoized<A, F>
where
    A: Serialize,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    R: Serialize + DeserializeOwned,
{
    /// Cache key for a set of arguments
    pub fn key_for(&self, args: &A) -> Result<String, MemoizeError<E>> {
        let suffix = match &self.key_fn {
            Some(key_fn) => key_fn(args),
            None => argument_digest(args).map_err(MemoizeError::UnsupportedArguments)?,
        };
        Ok(format!("memo:{}:{}", self.name, suffix))
    }

    /// Return the cached result or compute, cache and return it
    pub async fn call(&self, args: A) -> Result<R, MemoizeError<E>> {
        let key = self.key_for(&args)?;

        if let Some(value) = self.manager.get_json::<R>(&key).await {
            debug!("Memo HIT: {}", key);
            return Ok(value);
        }

        if !self.single_flight {
            return self.compute(&key, args).await;
        }

        let flight = Flight::join(&self.flights, &key);
        let _held = flight.lock.lock().await;

        // Another caller may have filled the key while we waited
        if let Some(value) = self.manager.get_json::<R>(&key).await {
            debug!("Memo HIT after wait: {}", key);
            return Ok(value);
        }

        self.compute(&key, args).await
    }

    /// Drop the cached result for `args`
    pub async fn invalidate(&self, args: &A) -> Result<bool, MemoizeError<E>> {
        let key = self.key_for(args)?;
        Ok(self.manager.delete(&key).await)
    }

    async fn compute(&self, key: &str, args: A) -> Result<R, MemoizeError<E>> {
        debug!("Memo MISS: {}", key);
        let value = (self.computation)(args)
            .await
            .map_err(MemoizeError::Computation)?;

        match self.manager.set_json(key, &value, self.ttl).await {
            Ok(outcome) if !outcome.success() => {
                warn!("Memoized result for {} was not stored in any tier", key)
            }
            Ok(_) => {}
            Err(e) => warn!("Memoized result for {} could not be encoded: {}", key, e),
        }

        Ok(value)
    }
}
