mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use common::test_helpers::{send, DownStore};
use std::time::Duration;
use windowgate::{
    Backoff, CounterStore, FixedWindowLimiter, InMemoryStore, InstantSleeper, Jitter,
    RateLimitConfig, RateLimitLayer, ResilientStore, RetryPolicy, Settings, StoreError,
};

/// Never answers.
#[derive(Debug, Clone)]
struct Hung;

#[async_trait]
impl CounterStore for Hung {
    type Error = std::io::Error;

    async fn get(&self, _key: &str) -> Result<Option<String>, Self::Error> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), Self::Error> {
        std::future::pending().await
    }

    async fn incr(&self, _key: &str) -> Result<i64, Self::Error> {
        std::future::pending().await
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), Self::Error> {
        std::future::pending().await
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, Self::Error> {
        std::future::pending().await
    }
}

fn app<S: CounterStore + 'static>(store: S) -> Router {
    let config = RateLimitConfig::builder("login").limit(3).build().unwrap();
    Router::new().route(
        "/login",
        post(|| async { "ok" }).layer(RateLimitLayer::new(FixedWindowLimiter::new(store, config))),
    )
}

#[tokio::test(start_paused = true)]
async fn hung_store_times_out_into_503() {
    let store = ResilientStore::new(Hung).with_timeout(Duration::from_millis(200));
    let (status, _, _) = send(&app(store), "POST", "/login", Some([1, 2, 3, 4])).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(start_paused = true)]
async fn timeout_error_reports_budget() {
    let store = ResilientStore::new(Hung).with_timeout(Duration::from_millis(200));
    let err = store.incr("k").await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("200ms"), "{err}");
}

#[tokio::test]
async fn exhausted_retries_keep_every_failure() {
    let policy = RetryPolicy::builder()
        .max_attempts(3)
        .backoff(Backoff::constant(Duration::from_millis(5)))
        .with_jitter(Jitter::None)
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let store = ResilientStore::new(DownStore).with_retry(policy);

    match store.get("k").await {
        Err(StoreError::RetryExhausted { attempts, failures }) => {
            assert_eq!(attempts, 3);
            assert_eq!(failures.len(), 3);
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn settings_hardened_store_still_counts() {
    let settings = Settings::from_json(r#"{"store":{"timeout_ms":500,"retry_attempts":2}}"#).unwrap();
    let app = app(settings.harden(InMemoryStore::new()).unwrap());
    let peer = Some([1, 2, 3, 4]);

    for _ in 0..3 {
        assert_eq!(send(&app, "POST", "/login", peer).await.0, StatusCode::OK);
    }
    assert_eq!(send(&app, "POST", "/login", peer).await.0, StatusCode::TOO_MANY_REQUESTS);
}
