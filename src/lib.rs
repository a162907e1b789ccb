#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # windowgate
//!
//! Request gates for axum/tower services backed by a shared key-value store.
//!
//! ## Features
//!
//! - **Fixed-window rate limiting** per client, keyed `"{prefix}:{identifier}"`
//! - **Read-through response caching** of JSON bodies with a fixed TTL
//! - **Pluggable storage** through [`CounterStore`] (in-memory here, Redis in
//!   `windowgate-redis`)
//! - **Store hardening** with retry, backoff, jitter and timeouts via [`ResilientStore`]
//! - **Explicit failure modes**: fail open or fail closed when the store is down
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::{get, post}, Router};
//! use windowgate::cache::{keys, CacheLayer};
//! use windowgate::{CacheConfig, FixedWindowLimiter, InMemoryStore, RateLimitConfig,
//!     RateLimitLayer, ResponseCache};
//!
//! # fn main() -> Result<(), windowgate::ConfigError> {
//! let store = InMemoryStore::new();
//! let login = RateLimitConfig::builder("login").limit(3).window_secs(60).build()?;
//! let posts = ResponseCache::new(store.clone(), CacheConfig::builder().ttl_secs(5).build()?);
//!
//! let app: Router = Router::new()
//!     .route("/api/auth/login", post(|| async { "ok" })
//!         .layer(RateLimitLayer::new(FixedWindowLimiter::new(store.clone(), login))))
//!     .route("/api/posts", get(|| async { axum::Json(vec!["hello"]) })
//!         .layer(CacheLayer::new(posts, keys::by_uri())));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod error;
pub mod failure;
pub mod jitter;
pub mod prelude;
pub mod rate_limit;
pub mod retry;
pub mod settings;
pub mod sleeper;
pub mod store;
pub mod telemetry;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use cache::{CacheConfig, CacheLayer, ResponseCache};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{BoxError, CacheError, ConfigError, LimiterError, Rejection, StoreError};
pub use failure::FailureMode;
pub use jitter::Jitter;
pub use rate_limit::{Decision, FixedWindowLimiter, RateLimitConfig, RateLimitLayer, RateLimiter};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use settings::Settings;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{CounterStore, InMemoryStore, ResilientStore};
pub use telemetry::{GateEvent, GateSink, LogSink, MemorySink, NullSink};
