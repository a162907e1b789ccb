//! Retry-with-backoff for store calls.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - `should_retry` decides whether a failed attempt is retried; a rejected error is returned
//!   as `StoreError::Backend` immediately.
//! - Once attempts run out the result is `StoreError::RetryExhausted` with the recent failures.
//! - The sleeper is called exactly `attempts - 1` times.
//!
//! ```rust
//! use std::time::Duration;
//! use windowgate::{Backoff, InstantSleeper, Jitter, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<std::io::Error>::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(Duration::from_millis(20)))
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let value = policy.execute(|| async { Ok::<_, std::io::Error>(7) }).await.unwrap();
//! assert_eq!(value, 7);
//! # });
//! ```

use crate::error::{ConfigError, StoreError, MAX_RETRY_FAILURES};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E>
where
    E: Send + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, returns a non-retryable error, or attempts run out.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, StoreError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let mut failures: VecDeque<E> = VecDeque::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !(self.should_retry)(&err) {
                return Err(StoreError::Backend(err));
            }

            failures.push_back(err);
            if failures.len() > MAX_RETRY_FAILURES {
                failures.pop_front();
            }
            if attempt >= self.max_attempts {
                return Err(StoreError::retry_exhausted(attempt, failures.into()));
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            tracing::debug!(
                target: "windowgate::retry",
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying store call"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E>
where
    E: Send + 'static,
{
    /// Three attempts, 50ms exponential backoff, full jitter, retry everything.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: Jitter::Full,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Only errors matching `predicate` are retried.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<E: Send + 'static> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
