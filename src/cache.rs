//! Read-through caching of JSON responses.
//!
//! [`ResponseCache`] is the store-facing half: it reads and writes serialized JSON under a
//! caller-chosen key with a fixed TTL. [`CacheLayer`] is the HTTP half: it answers from the
//! cache on a hit and, on a miss, stores the JSON body the handler produced before
//! forwarding it. Entries are never invalidated explicitly; they live until the store
//! expires them.
//!
//! ```rust
//! use std::time::Duration;
//! use windowgate::cache::{CacheConfig, ResponseCache};
//! use windowgate::{CacheError, InMemoryStore};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = ResponseCache::new(
//!     InMemoryStore::new(),
//!     CacheConfig::builder().ttl(Duration::from_secs(5)).build().unwrap(),
//! );
//! let first: u32 = cache.read_through("answer", || async { Ok::<_, CacheError>(42) }).await?;
//! let second: u32 = cache.read_through("answer", || async { Ok::<_, CacheError>(7) }).await?;
//! assert_eq!((first, second), (42, 42));
//! # Ok(())
//! # }
//! ```

use crate::error::{CacheError, ConfigError};
use crate::failure::FailureMode;
use crate::store::CounterStore;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

pub mod keys;
pub mod middleware;

pub use keys::KeyBuilder;
pub use middleware::{CacheLayer, CacheService, X_CACHE};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
/// Largest response body the middleware will buffer for caching.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    ttl: Duration,
    on_store_error: FailureMode,
    max_body_bytes: usize,
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder {
            ttl: DEFAULT_TTL,
            on_store_error: FailureMode::FailOpen,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn on_store_error(&self) -> FailureMode {
        self.on_store_error
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            on_store_error: FailureMode::FailOpen,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    ttl: Duration,
    on_store_error: FailureMode,
    max_body_bytes: usize,
}

impl CacheConfigBuilder {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl_secs(self, secs: u64) -> Self {
        self.ttl(Duration::from_secs(secs))
    }

    /// Cache store failures default to `FailOpen`: caching is an optimization.
    pub fn on_store_error(mut self, mode: FailureMode) -> Self {
        self.on_store_error = mode;
        self
    }

    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        if self.ttl.as_secs() == 0 {
            return Err(ConfigError::ZeroDuration("ttl"));
        }
        Ok(CacheConfig {
            ttl: Duration::from_secs(self.ttl.as_secs()),
            on_store_error: self.on_store_error,
            max_body_bytes: self.max_body_bytes,
        })
    }
}

/// Store-facing half of the response cache.
#[derive(Debug, Clone)]
pub struct ResponseCache<S> {
    store: S,
    config: CacheConfig,
}

impl<S> ResponseCache<S>
where
    S: CounterStore,
{
    pub fn new(store: S, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fetch and decode the entry at `key`.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let raw = self.store.get(key).await.map_err(|e| CacheError::Store(Box::new(e)))?;
        raw.map(|raw| decode(key, &raw)).transpose()
    }

    /// Fetch the entry at `key` as stored, after checking it is valid JSON.
    pub async fn lookup_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let raw = self.store.get(key).await.map_err(|e| CacheError::Store(Box::new(e)))?;
        match raw {
            Some(raw) => {
                decode::<IgnoredAny>(key, &raw)?;
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }

    /// Serialize `value` and store it for the configured TTL.
    pub async fn insert<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(CacheError::Serialize)?;
        self.insert_raw(key, &raw).await
    }

    /// Store text that is already serialized JSON.
    pub async fn insert_raw(&self, key: &str, json: &str) -> Result<(), CacheError> {
        self.store
            .set(key, json, self.config.ttl)
            .await
            .map_err(|e| CacheError::Store(Box::new(e)))
    }

    /// Return the cached value for `key`, or run `producer` once and cache what it returns.
    ///
    /// Under `FailOpen`, store failures and undecodable entries are logged and treated as
    /// misses; under `FailClosed` they are returned as errors.
    pub async fn read_through<T, E, Fut, F>(&self, key: &str, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        Fut: Future<Output = Result<T, E>>,
        F: FnOnce() -> Fut,
    {
        match self.lookup(key).await {
            Ok(Some(hit)) => return Ok(hit),
            Ok(None) => {}
            Err(err) => self.tolerate(key, err)?,
        }

        let value = producer().await?;
        if let Err(err) = self.insert(key, &value).await {
            self.tolerate(key, err)?;
        }
        Ok(value)
    }

    /// Swallow `err` under `FailOpen`, return it under `FailClosed`.
    pub(crate) fn tolerate(&self, key: &str, err: CacheError) -> Result<(), CacheError> {
        if self.config.on_store_error.is_open() {
            tracing::warn!(target: "windowgate::cache", key = %key, error = %err, "cache bypassed");
            Ok(())
        } else {
            Err(err)
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|source| CacheError::Malformed { key: key.to_string(), source })
}
