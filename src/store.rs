//! Key-value counter store seam shared by the rate limiter and the response cache.
//!
//! Both gates talk to storage only through [`CounterStore`], so the same limiter runs against
//! the in-memory store in tests and against Redis (see the `windowgate-redis` crate) in
//! production. Every operation is an await point; atomicity of `incr` is the store's job.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod resilient;

pub use memory::{InMemoryStore, MemoryStoreError};
pub use resilient::ResilientStore;

/// Minimal expiring key-value store with an atomic counter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch a value. Missing and expired keys both yield `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Store `value` under `key`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error>;

    /// Atomically increment the integer at `key` and return the new value.
    ///
    /// A missing key counts from zero and carries no TTL afterwards.
    async fn incr(&self, key: &str) -> Result<i64, Self::Error>;

    /// Set the TTL of an existing key. Missing keys are left alone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error>;

    /// Remaining TTL of `key`. `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error>;
}

#[async_trait]
impl<S> CounterStore for Arc<S>
where
    S: CounterStore + ?Sized,
{
    type Error = S::Error;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error> {
        (**self).set(key, value, ttl).await
    }

    async fn incr(&self, key: &str) -> Result<i64, Self::Error> {
        (**self).incr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        (**self).expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        (**self).ttl(key).await
    }
}
