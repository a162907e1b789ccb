use crate::error::{BoxError, LimiterError};
use crate::rate_limit::{Decision, RateLimitConfig, RateLimiter};
use crate::store::CounterStore;
use async_trait::async_trait;

/// Fixed-window counter backed by a [`CounterStore`].
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter<S> {
    store: S,
    config: RateLimitConfig,
}

impl<S> FixedWindowLimiter<S>
where
    S: CounterStore,
{
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[async_trait]
impl<S> RateLimiter for FixedWindowLimiter<S>
where
    S: CounterStore,
{
    async fn acquire(&self, identifier: &str) -> Result<Decision, BoxError> {
        let key = self.config.key_for(identifier);
        let count = self.store.incr(&key).await?;

        let count = match u64::try_from(count) {
            Ok(n) if n > 0 => n,
            _ => return Err(LimiterError::InvalidCount { key, count }.into()),
        };

        // Only the request that opens the window sets the TTL.
        if count == 1 {
            self.store.expire(&key, self.config.window()).await?;
        }

        let limit = self.config.limit();
        if count > limit {
            // A counter with no TTL never resets; reopen the window if the first expire was lost.
            if self.store.ttl(&key).await?.is_none() {
                tracing::warn!(target: "windowgate::rate_limit", key = %key, "counter had no ttl");
                self.store.expire(&key, self.config.window()).await?;
            }
            tracing::debug!(target: "windowgate::rate_limit", key = %key, count, limit, "denied");
            return Ok(Decision::Denied { count, limit, window: self.config.window() });
        }
        Ok(Decision::Allowed { count, limit })
    }
}
