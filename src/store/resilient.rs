//! Retry and timeout around any [`CounterStore`].
//!
//! Store calls carry no timeout by default: a hung backend hangs the request. Wrapping the
//! store bounds each operation and retries transient failures with backoff.
//!
//! `incr` is not idempotent. A retried increment whose first attempt actually reached the
//! backend counts twice, so pass a `should_retry` predicate that only matches errors raised
//! before the command was sent when exact counts matter.

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::store::CounterStore;
use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};

pub struct ResilientStore<S: CounterStore> {
    inner: S,
    retry: Option<RetryPolicy<S::Error>>,
    timeout: Option<Duration>,
}

impl<S: CounterStore + std::fmt::Debug> std::fmt::Debug for ResilientStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("inner", &self.inner)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S: CounterStore + Clone> Clone for ResilientStore<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), retry: self.retry.clone(), timeout: self.timeout }
    }
}

impl<S: CounterStore> ResilientStore<S> {
    /// Wrap `inner` with neither retry nor timeout; add them with the `with_*` methods.
    pub fn new(inner: S) -> Self {
        Self { inner, retry: None, timeout: None }
    }

    pub fn with_retry(mut self, policy: RetryPolicy<S::Error>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Bound each operation, retries included, by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn guarded<T, Fut, F>(&self, op: F) -> Result<T, StoreError<S::Error>>
    where
        T: Send,
        Fut: Future<Output = Result<T, S::Error>> + Send,
        F: Fn() -> Fut + Send + Sync,
    {
        let run = async {
            match &self.retry {
                Some(policy) => policy.execute(&op).await,
                None => op().await.map_err(StoreError::Backend),
            }
        };

        let Some(timeout) = self.timeout else {
            return run.await;
        };
        let start = Instant::now();
        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::warn!(
                    target: "windowgate::store",
                    timeout_ms = timeout.as_millis() as u64,
                    "store call timed out"
                );
                Err(StoreError::Timeout { elapsed, timeout })
            }
        }
    }
}

#[async_trait]
impl<S> CounterStore for ResilientStore<S>
where
    S: CounterStore,
{
    type Error = StoreError<S::Error>;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        self.guarded(|| self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error> {
        self.guarded(|| self.inner.set(key, value, ttl)).await
    }

    async fn incr(&self, key: &str) -> Result<i64, Self::Error> {
        self.guarded(|| self.inner.incr(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        self.guarded(|| self.inner.expire(key, ttl)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        self.guarded(|| self.inner.ttl(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backoff, InMemoryStore, InstantSleeper, Jitter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("backend unreachable")]
    struct Unreachable;

    /// Fails the first `failures` calls of every kind, then delegates.
    #[derive(Debug, Clone)]
    struct Flaky {
        failures: usize,
        calls: Arc<AtomicUsize>,
        inner: InMemoryStore,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self { failures, calls: Arc::default(), inner: InMemoryStore::new() }
        }

        fn gate(&self) -> Result<(), Unreachable> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(Unreachable)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CounterStore for Flaky {
        type Error = Unreachable;

        async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
            self.gate()?;
            Ok(self.inner.get(key).await.unwrap_or(None))
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error> {
            self.gate()?;
            let _ = self.inner.set(key, value, ttl).await;
            Ok(())
        }

        async fn incr(&self, key: &str) -> Result<i64, Self::Error> {
            self.gate()?;
            self.inner.incr(key).await.map_err(|_| Unreachable)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
            self.gate()?;
            let _ = self.inner.expire(key, ttl).await;
            Ok(())
        }

        async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
            self.gate()?;
            Ok(self.inner.ttl(key).await.unwrap_or(None))
        }
    }

    fn retry(attempts: usize) -> RetryPolicy<Unreachable> {
        RetryPolicy::builder()
            .max_attempts(attempts)
            .backoff(Backoff::constant(Duration::from_millis(1)))
            .with_jitter(Jitter::None)
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn passthrough_maps_errors_to_backend() {
        let store = ResilientStore::new(Flaky::new(1));
        let err = store.incr("k").await.unwrap_err();
        assert!(err.as_backend().is_some());
        assert_eq!(store.incr("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let flaky = Flaky::new(2);
        let store = ResilientStore::new(flaky.clone()).with_retry(retry(3));
        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = ResilientStore::new(Flaky::new(10)).with_retry(retry(2));
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_retry_exhausted());
        assert_eq!(err.failures().map(<[_]>::len), Some(2));
    }

    #[derive(Debug)]
    struct Hung;

    #[async_trait]
    impl CounterStore for Hung {
        type Error = Unreachable;

        async fn get(&self, _key: &str) -> Result<Option<String>, Self::Error> {
            futures::future::pending().await
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), Self::Error> {
            futures::future::pending().await
        }

        async fn incr(&self, _key: &str) -> Result<i64, Self::Error> {
            futures::future::pending().await
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), Self::Error> {
            futures::future::pending().await
        }

        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, Self::Error> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_hung_backend() {
        let store = ResilientStore::new(Hung).with_timeout(Duration::from_millis(250));
        let err = store.incr("k").await.unwrap_err();
        assert!(err.is_timeout());
    }
}
