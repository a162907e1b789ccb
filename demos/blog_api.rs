//! Blog API with a rate-limited login route and a cached post listing.
//!
//! ```text
//! cargo run --example blog_api                 # in-memory counters
//! WINDOWGATE_REDIS_URL=redis://127.0.0.1:6379 cargo run --example blog_api
//! curl -X POST localhost:3000/api/auth/login     # 429 after WINDOWGATE_RATE_LIMIT tries
//! curl -i localhost:3000/api/posts               # x-cache: MISS, then HIT
//! ```

use axum::extract::Query;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use windowgate::cache::{keys, CacheLayer};
use windowgate::{
    ConfigError, CounterStore, FixedWindowLimiter, InMemoryStore, LogSink, RateLimitLayer,
    ResponseCache, Settings,
};
use windowgate_redis::RedisStore;

#[derive(Deserialize)]
struct Page {
    page: Option<u32>,
}

async fn login() -> Json<Value> {
    Json(json!({ "token": "demo-token" }))
}

fn app<S: CounterStore + Clone + 'static>(settings: &Settings, store: S) -> Result<Router, ConfigError> {
    let store = settings.harden(store)?;

    let limiter = FixedWindowLimiter::new(store.clone(), settings.rate_limit_config()?);
    let rate_limit = RateLimitLayer::new(limiter)
        .on_store_error(settings.rate_limit.failure_mode)
        .with_sink(LogSink);

    let renders = Arc::new(AtomicU64::new(0));
    let posts = get(move |Query(page): Query<Page>| {
        let renders = renders.clone();
        async move {
            let render = renders.fetch_add(1, Ordering::SeqCst) + 1;
            Json(json!({
                "page": page.page.unwrap_or(1),
                "posts": ["hello", "world"],
                "render": render,
            }))
        }
    });
    let cache = ResponseCache::new(store, settings.cache_config()?);

    Ok(Router::new()
        .route("/api/auth/login", post(login).layer(rate_limit))
        .route(
            "/api/posts",
            posts.layer(CacheLayer::new(cache, keys::prefixed("cache", keys::by_uri()))
                .with_sink(LogSink)),
        ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,windowgate=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    let router = match settings.redis_url.as_deref() {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            tracing::info!("counters and cache entries live in redis");
            app(&settings, store)?
        }
        None => {
            tracing::info!("WINDOWGATE_REDIS_URL not set, using the in-memory store");
            app(&settings, InMemoryStore::new())?
        }
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
