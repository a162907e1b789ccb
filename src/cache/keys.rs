//! Cache key builders: functions from request head to cache key.

use axum::http::request::Parts;
use std::sync::Arc;

/// Maps a request head to the key its response is cached under.
pub type KeyBuilder = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

/// Wrap any closure as a [`KeyBuilder`].
pub fn from_fn<F>(f: F) -> KeyBuilder
where
    F: Fn(&Parts) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Path and query, e.g. `/api/posts?page=2`.
pub fn by_uri() -> KeyBuilder {
    from_fn(|parts| {
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string())
    })
}

/// Path only; query strings share one entry.
pub fn by_path() -> KeyBuilder {
    from_fn(|parts| parts.uri.path().to_string())
}

/// Namespace another builder's keys as `"{prefix}:{key}"`.
pub fn prefixed(prefix: impl Into<String>, inner: KeyBuilder) -> KeyBuilder {
    let prefix = prefix.into();
    from_fn(move |parts| format!("{}:{}", prefix, inner(parts)))
}
