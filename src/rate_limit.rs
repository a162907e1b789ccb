//! Fixed-window rate limiting.
//!
//! - [`RateLimiter`]: the decision seam the middleware asks.
//! - [`FixedWindowLimiter`]: counts requests per `"{key_prefix}:{identifier}"` in a
//!   [`CounterStore`](crate::store::CounterStore).
//! - [`RateLimitLayer`]: tower middleware that turns a denial into a 429.
//!
//! # Window semantics
//!
//! The window starts at the first request for a key: the TTL is set only when the counter
//! reaches 1 and is never renewed. Windows are therefore fixed, not sliding, and a client
//! can get up to `2 * limit` requests through around a window boundary.

use crate::error::{BoxError, ConfigError};
use axum::http::HeaderName;
use std::time::Duration;

pub mod fixed_window;
pub mod identity;
pub mod middleware;

pub use fixed_window::FixedWindowLimiter;
pub use identity::{client_identifier, GLOBAL_IDENTIFIER};
pub use middleware::{RateLimitLayer, RateLimitService};

/// Response header carrying the configured limit.
pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Response header carrying how many requests remain in the current window.
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

pub const DEFAULT_LIMIT: u64 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of counting one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        /// Requests seen in this window, this one included.
        count: u64,
        limit: u64,
    },
    Denied { count: u64, limit: u64, window: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn count(&self) -> u64 {
        match self {
            Decision::Allowed { count, .. } | Decision::Denied { count, .. } => *count,
        }
    }

    /// Requests left before denial; zero once denied.
    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Allowed { count, limit } => limit.saturating_sub(*count),
            Decision::Denied { .. } => 0,
        }
    }
}

/// Counts a request for `identifier` and decides whether it may proceed.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self, identifier: &str) -> Result<Decision, BoxError>;
}

#[async_trait::async_trait]
impl<L: RateLimiter + ?Sized> RateLimiter for std::sync::Arc<L> {
    async fn acquire(&self, identifier: &str) -> Result<Decision, BoxError> {
        (**self).acquire(identifier).await
    }
}

/// Validated limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    key_prefix: String,
    limit: u64,
    window: Duration,
}

impl RateLimitConfig {
    /// Start a builder; `key_prefix` namespaces this limiter's counters.
    pub fn builder(key_prefix: impl Into<String>) -> RateLimitConfigBuilder {
        RateLimitConfigBuilder {
            key_prefix: key_prefix.into(),
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counter key for `identifier`.
    pub fn key_for(&self, identifier: &str) -> String {
        format!("{}:{}", self.key_prefix, identifier)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfigBuilder {
    key_prefix: String,
    limit: u64,
    window: Duration,
}

impl RateLimitConfigBuilder {
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window_secs(self, secs: u64) -> Self {
        self.window(Duration::from_secs(secs))
    }

    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        let prefix = self.key_prefix.trim();
        if prefix.is_empty() {
            return Err(ConfigError::EmptyKeyPrefix);
        }
        if prefix.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(ConfigError::InvalidKeyPrefix(prefix.to_string()));
        }
        if self.limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        // Store TTLs are whole seconds.
        if self.window.as_secs() == 0 {
            return Err(ConfigError::ZeroDuration("window"));
        }
        Ok(RateLimitConfig {
            key_prefix: prefix.to_string(),
            limit: self.limit,
            window: Duration::from_secs(self.window.as_secs()),
        })
    }
}
