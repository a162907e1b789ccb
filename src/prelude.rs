//! Convenient re-exports for wiring gates into a router.
pub use crate::{
    cache::{keys, CacheConfig, CacheLayer, ResponseCache, X_CACHE},
    error::{CacheError, ConfigError, Rejection, StoreError},
    failure::FailureMode,
    rate_limit::{
        client_identifier, Decision, FixedWindowLimiter, RateLimitConfig, RateLimitLayer,
        RateLimiter,
    },
    settings::Settings,
    store::{CounterStore, InMemoryStore, ResilientStore},
    telemetry::{GateEvent, GateSink, LogSink, MemorySink, NullSink},
    Backoff, Jitter, RetryPolicy,
};
