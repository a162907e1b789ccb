//! Error types for stores, configuration, and request rejections
use crate::backoff::BackoffError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Boxed error used at the seams where the concrete store error type is erased.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Cap the number of stored failures inside RetryExhausted to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Message sent to clients that exceed their window.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Failure of a store call made through [`crate::store::ResilientStore`].
#[derive(Debug, Clone)]
pub enum StoreError<E> {
    /// The call did not finish within the configured timeout
    Timeout { elapsed: Duration, timeout: Duration },
    /// Every retry attempt failed
    RetryExhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The backing store reported an error
    Backend(E),
}

impl<E: fmt::Display> fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "store call timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::RetryExhausted { attempts, failures } => match failures.last() {
                Some(last) => {
                    write!(f, "store call failed after {} attempts; last error: {}", attempts, last)
                }
                None => write!(f, "store call failed after {} attempts", attempts),
            },
            Self::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for StoreError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            Self::Timeout { .. } => None,
        }
    }
}

impl<E> StoreError<E> {
    /// Build `RetryExhausted`, keeping only the most recent `MAX_RETRY_FAILURES` failures.
    pub fn retry_exhausted(attempts: usize, failures: Vec<E>) -> Self {
        let trimmed = if failures.len() > MAX_RETRY_FAILURES {
            failures.into_iter().rev().take(MAX_RETRY_FAILURES).rev().collect()
        } else {
            failures
        };
        StoreError::RetryExhausted { attempts, failures: Arc::new(trimmed) }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Borrow the backend error if this is a `Backend` variant.
    pub fn as_backend(&self) -> Option<&E> {
        match self {
            Self::Backend(e) => Some(e),
            _ => None,
        }
    }

    /// Recorded failures for `RetryExhausted`.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }
}

/// Invalid limiter or cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("key prefix must not be empty")]
    EmptyKeyPrefix,
    #[error("key prefix must not contain whitespace or control characters ({0:?})")]
    InvalidKeyPrefix(String),
    #[error("limit must be > 0")]
    ZeroLimit,
    #[error("{0} must be at least one second")]
    ZeroDuration(&'static str),
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("invalid value for {name}: {value:?}")]
    InvalidSetting { name: String, value: String },
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

/// The counter store returned something the limiter cannot count with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    #[error("counter at {key:?} is not positive ({count})")]
    InvalidCount { key: String, count: i64 },
}

/// Errors from the response cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The stored value is not valid JSON.
    #[error("cached entry for {key:?} is not valid JSON: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize response for caching: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("cache store error: {0}")]
    Store(#[source] BoxError),
}

/// A request turned away by a gate. Rendered as a JSON error response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("{}", RATE_LIMIT_MESSAGE)]
    RateLimited { limit: u64, window: Duration },
    #[error("{component} is temporarily unavailable")]
    Unavailable { component: &'static str },
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody { code: status.as_u16(), message: self.to_string() });
        let mut response = (status, body).into_response();
        if let Rejection::RateLimited { limit, .. } = &self {
            response.headers_mut().insert(
                crate::rate_limit::LIMIT_HEADER,
                HeaderValue::from(*limit),
            );
            response
                .headers_mut()
                .insert(crate::rate_limit::REMAINING_HEADER, HeaderValue::from_static("0"));
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn timeout_display_mentions_limit() {
        let err: StoreError<DummyError> = StoreError::Timeout {
            elapsed: Duration::from_millis(510),
            timeout: Duration::from_millis(500),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("500ms"));
        assert!(err.source().is_none());
    }

    #[test]
    fn retry_exhausted_keeps_most_recent_failures() {
        let failures: Vec<_> = (0..15).map(|_| DummyError("boom")).collect();
        let err = StoreError::retry_exhausted(15, failures);
        assert_eq!(err.failures().map(<[_]>::len), Some(MAX_RETRY_FAILURES));
        assert!(err.to_string().contains("last error: boom"));
        assert!(err.source().is_some());
    }

    #[test]
    fn retry_exhausted_without_failures_still_displays() {
        let err: StoreError<DummyError> = StoreError::retry_exhausted(2, vec![]);
        assert_eq!(err.to_string(), "store call failed after 2 attempts");
    }

    #[test]
    fn backend_error_is_transparent() {
        let err = StoreError::Backend(DummyError("connection refused"));
        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(err.as_backend(), Some(&DummyError("connection refused")));
        assert!(!err.is_timeout());
    }

    #[test]
    fn rate_limited_renders_429() {
        let rejection = Rejection::RateLimited { limit: 3, window: Duration::from_secs(60) };
        assert_eq!(rejection.to_string(), RATE_LIMIT_MESSAGE);
        let response = rejection.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[crate::rate_limit::LIMIT_HEADER], "3");
        assert_eq!(response.headers()[crate::rate_limit::REMAINING_HEADER], "0");
    }

    #[test]
    fn unavailable_renders_503() {
        let response = Rejection::Unavailable { component: "rate limiter" }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }
}
