//! Deployment settings for both gates and the store underneath them.
//!
//! [`Settings`] deserializes from JSON (every field optional) or from `WINDOWGATE_*`
//! environment variables, and converts into the validated config types the gates take.
//!
//! | Variable                              | Default      |
//! |---------------------------------------|--------------|
//! | `WINDOWGATE_REDIS_URL`                | unset        |
//! | `WINDOWGATE_RATE_LIMIT_PREFIX`        | `ratelimit`  |
//! | `WINDOWGATE_RATE_LIMIT`               | `10`         |
//! | `WINDOWGATE_RATE_LIMIT_WINDOW_SECS`   | `60`         |
//! | `WINDOWGATE_RATE_LIMIT_FAILURE_MODE`  | `fail_closed`|
//! | `WINDOWGATE_CACHE_TTL_SECS`           | `600`        |
//! | `WINDOWGATE_CACHE_MAX_BODY_BYTES`     | `1048576`    |
//! | `WINDOWGATE_CACHE_FAILURE_MODE`       | `fail_open`  |
//! | `WINDOWGATE_STORE_TIMEOUT_MS`         | unset        |
//! | `WINDOWGATE_STORE_RETRY_ATTEMPTS`     | `1`          |
//! | `WINDOWGATE_STORE_RETRY_BASE_MS`      | `50`         |
//! | `WINDOWGATE_STORE_RETRY_MAX_MS`       | unset        |

use crate::cache::{CacheConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_TTL};
use crate::error::ConfigError;
use crate::failure::FailureMode;
use crate::rate_limit::{RateLimitConfig, DEFAULT_LIMIT, DEFAULT_WINDOW};
use crate::retry::RetryPolicy;
use crate::store::{CounterStore, ResilientStore};
use crate::Backoff;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "WINDOWGATE_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connection string for `windowgate-redis`; `None` means use the in-memory store.
    pub redis_url: Option<String>,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub key_prefix: String,
    pub limit: u64,
    pub window_secs: u64,
    pub failure_mode: FailureMode,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            key_prefix: "ratelimit".to_string(),
            limit: DEFAULT_LIMIT,
            window_secs: DEFAULT_WINDOW.as_secs(),
            failure_mode: FailureMode::FailClosed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_body_bytes: usize,
    pub failure_mode: FailureMode,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            failure_mode: FailureMode::FailOpen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub timeout_ms: Option<u64>,
    /// Total attempts per store call; `1` disables retry.
    pub retry_attempts: usize,
    /// First retry delay; later delays double from here.
    pub retry_base_ms: u64,
    /// Cap on a single retry delay.
    pub retry_max_ms: Option<u64>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { timeout_ms: None, retry_attempts: 1, retry_base_ms: 50, retry_max_ms: None }
    }
}

impl Settings {
    /// Read `WINDOWGATE_*` variables from the process environment over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Settings::from_env`], with variables resolved by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        let mut settings = Settings::default();
        if let Some((_, url)) = var("REDIS_URL") {
            settings.redis_url = Some(url);
        }

        let rl = &mut settings.rate_limit;
        if let Some((_, prefix)) = var("RATE_LIMIT_PREFIX") {
            rl.key_prefix = prefix;
        }
        if let Some((name, v)) = var("RATE_LIMIT") {
            rl.limit = parse(&name, &v)?;
        }
        if let Some((name, v)) = var("RATE_LIMIT_WINDOW_SECS") {
            rl.window_secs = parse(&name, &v)?;
        }
        if let Some((name, v)) = var("RATE_LIMIT_FAILURE_MODE") {
            rl.failure_mode = parse(&name, &v)?;
        }

        let cache = &mut settings.cache;
        if let Some((name, v)) = var("CACHE_TTL_SECS") {
            cache.ttl_secs = parse(&name, &v)?;
        }
        if let Some((name, v)) = var("CACHE_MAX_BODY_BYTES") {
            cache.max_body_bytes = parse(&name, &v)?;
        }
        if let Some((name, v)) = var("CACHE_FAILURE_MODE") {
            cache.failure_mode = parse(&name, &v)?;
        }

        let store = &mut settings.store;
        if let Some((name, v)) = var("STORE_TIMEOUT_MS") {
            store.timeout_ms = Some(parse(&name, &v)?);
        }
        if let Some((name, v)) = var("STORE_RETRY_ATTEMPTS") {
            store.retry_attempts = parse(&name, &v)?;
        }
        if let Some((name, v)) = var("STORE_RETRY_BASE_MS") {
            store.retry_base_ms = parse(&name, &v)?;
        }
        if let Some((name, v)) = var("STORE_RETRY_MAX_MS") {
            store.retry_max_ms = Some(parse(&name, &v)?);
        }

        Ok(settings)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidSetting {
            name: "settings".to_string(),
            value: e.to_string(),
        })
    }

    pub fn rate_limit_config(&self) -> Result<RateLimitConfig, ConfigError> {
        RateLimitConfig::builder(self.rate_limit.key_prefix.as_str())
            .limit(self.rate_limit.limit)
            .window_secs(self.rate_limit.window_secs)
            .build()
    }

    pub fn cache_config(&self) -> Result<CacheConfig, ConfigError> {
        CacheConfig::builder()
            .ttl_secs(self.cache.ttl_secs)
            .max_body_bytes(self.cache.max_body_bytes)
            .on_store_error(self.cache.failure_mode)
            .build()
    }

    /// Wrap `store` with the configured timeout and retry.
    pub fn harden<S: CounterStore>(&self, store: S) -> Result<ResilientStore<S>, ConfigError> {
        let mut hardened = ResilientStore::new(store);
        if let Some(ms) = self.store.timeout_ms {
            if ms == 0 {
                return Err(ConfigError::ZeroDuration("store timeout"));
            }
            hardened = hardened.with_timeout(Duration::from_millis(ms));
        }
        if self.store.retry_attempts > 1 {
            let mut backoff = Backoff::exponential(Duration::from_millis(self.store.retry_base_ms));
            if let Some(max) = self.store.retry_max_ms {
                backoff = backoff.with_max(Duration::from_millis(max))?;
            }
            let policy = RetryPolicy::builder()
                .max_attempts(self.store.retry_attempts)
                .backoff(backoff)
                .build()?;
            hardened = hardened.with_retry(policy);
        } else if self.store.retry_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        Ok(hardened)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidSetting {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffError;
    use crate::InMemoryStore;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_gate_defaults() {
        let settings = Settings::from_lookup(env(&[])).unwrap();
        assert_eq!(settings, Settings::default());

        let rl = settings.rate_limit_config().unwrap();
        assert_eq!(rl.limit(), 10);
        assert_eq!(rl.window(), Duration::from_secs(60));
        assert_eq!(settings.cache_config().unwrap(), CacheConfig::default());
        assert_eq!(settings.rate_limit.failure_mode, FailureMode::FailClosed);
    }

    #[test]
    fn env_overrides() {
        let settings = Settings::from_lookup(env(&[
            ("WINDOWGATE_REDIS_URL", "redis://cache:6379"),
            ("WINDOWGATE_RATE_LIMIT_PREFIX", "login"),
            ("WINDOWGATE_RATE_LIMIT", "3"),
            ("WINDOWGATE_RATE_LIMIT_FAILURE_MODE", "open"),
            ("WINDOWGATE_CACHE_TTL_SECS", " 5 "),
            ("WINDOWGATE_STORE_RETRY_ATTEMPTS", "4"),
            ("WINDOWGATE_STORE_RETRY_BASE_MS", "20"),
            ("WINDOWGATE_STORE_RETRY_MAX_MS", "200"),
        ]))
        .unwrap();

        assert_eq!(settings.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(settings.rate_limit.key_prefix, "login");
        assert_eq!(settings.rate_limit.limit, 3);
        assert_eq!(settings.rate_limit.failure_mode, FailureMode::FailOpen);
        assert_eq!(settings.cache_config().unwrap().ttl(), Duration::from_secs(5));
        assert_eq!(settings.store.retry_attempts, 4);
        assert_eq!(settings.store.retry_base_ms, 20);
        assert_eq!(settings.store.retry_max_ms, Some(200));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = Settings::from_lookup(env(&[("WINDOWGATE_RATE_LIMIT", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidSetting {
                name: "WINDOWGATE_RATE_LIMIT".to_string(),
                value: "lots".to_string()
            }
        );
        assert!(Settings::from_lookup(env(&[("WINDOWGATE_CACHE_FAILURE_MODE", "maybe")])).is_err());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let settings =
            Settings::from_json(r#"{"rate_limit":{"limit":3},"cache":{"failure_mode":"fail_closed"}}"#)
                .unwrap();
        assert_eq!(settings.rate_limit.limit, 3);
        assert_eq!(settings.rate_limit.window_secs, 60);
        assert_eq!(settings.cache.failure_mode, FailureMode::FailClosed);
        assert!(Settings::from_json("[1,2]").is_err());
    }

    #[test]
    fn invalid_gate_values_fail_conversion() {
        let mut settings = Settings::default();
        settings.rate_limit.limit = 0;
        assert_eq!(settings.rate_limit_config().unwrap_err(), ConfigError::ZeroLimit);

        settings.cache.ttl_secs = 0;
        assert_eq!(settings.cache_config().unwrap_err(), ConfigError::ZeroDuration("ttl"));
    }

    #[tokio::test]
    async fn harden_applies_timeout_and_retry() {
        let mut settings = Settings::default();
        settings.store.timeout_ms = Some(250);
        settings.store.retry_attempts = 3;
        let store = settings.harden(InMemoryStore::new()).unwrap();
        assert_eq!(store.incr("k").await.unwrap(), 1);

        settings.store.retry_attempts = 0;
        assert_eq!(
            settings.harden(InMemoryStore::new()).unwrap_err(),
            ConfigError::InvalidMaxAttempts(0)
        );
    }

    #[test]
    fn retry_cap_below_base_is_rejected() {
        let mut settings = Settings::default();
        settings.store.retry_attempts = 3;
        settings.store.retry_base_ms = 100;
        settings.store.retry_max_ms = Some(500);
        assert!(settings.harden(InMemoryStore::new()).is_ok());

        settings.store.retry_max_ms = Some(10);
        assert_eq!(
            settings.harden(InMemoryStore::new()).unwrap_err(),
            ConfigError::Backoff(BackoffError::MaxLessThanBase {
                base: Duration::from_millis(100),
                max: Duration::from_millis(10),
            })
        );
    }
}
