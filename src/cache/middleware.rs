use crate::cache::{KeyBuilder, ResponseCache};
use crate::error::{CacheError, Rejection};
use crate::store::CounterStore;
use crate::telemetry::{emit_best_effort, CacheEvent, GateEvent, GateSink, NullSink, SkipReason};
use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// `HIT` when served from the cache, `MISS` when the handler ran.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

const COMPONENT: &str = "response cache";

/// A layer that serves cached JSON responses and fills the cache on misses.
///
/// Only `GET` and `HEAD` requests consult the cache; every other method goes straight to the
/// inner service. Only `GET` responses that are `2xx`, carry a JSON content type and have a
/// body of known size up to `max_body_bytes` are stored. A hit replays the stored text as a
/// `200` with `content-type: application/json`.
pub struct CacheLayer<S, T = NullSink> {
    cache: Arc<ResponseCache<S>>,
    key_builder: KeyBuilder,
    sink: T,
}

impl<S, T: std::fmt::Debug> std::fmt::Debug for CacheLayer<S, T>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("cache", &self.cache)
            .field("key_builder", &"<fn>")
            .field("sink", &self.sink)
            .finish()
    }
}

impl<S, T: Clone> Clone for CacheLayer<S, T> {
    fn clone(&self) -> Self {
        Self { cache: self.cache.clone(), key_builder: self.key_builder.clone(), sink: self.sink.clone() }
    }
}

impl<S> CacheLayer<S> {
    pub fn new(cache: ResponseCache<S>, key_builder: KeyBuilder) -> Self {
        Self { cache: Arc::new(cache), key_builder, sink: NullSink }
    }
}

impl<S, T> CacheLayer<S, T> {
    pub fn with_sink<T2>(self, sink: T2) -> CacheLayer<S, T2> {
        CacheLayer { cache: self.cache, key_builder: self.key_builder, sink }
    }
}

impl<Inner, S, T: Clone> Layer<Inner> for CacheLayer<S, T> {
    type Service = CacheService<Inner, S, T>;

    fn layer(&self, inner: Inner) -> Self::Service {
        CacheService {
            inner,
            cache: self.cache.clone(),
            key_builder: self.key_builder.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Middleware service produced by [`CacheLayer`].
pub struct CacheService<Inner, S, T = NullSink> {
    inner: Inner,
    cache: Arc<ResponseCache<S>>,
    key_builder: KeyBuilder,
    sink: T,
}

impl<Inner: Clone, S, T: Clone> Clone for CacheService<Inner, S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: self.cache.clone(),
            key_builder: self.key_builder.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<Inner, S, T> Service<Request<Body>> for CacheService<Inner, S, T>
where
    Inner: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    Inner::Error: Send + 'static,
    S: CounterStore + 'static,
    T: GateSink,
    T::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Inner::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let method = req.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return Box::pin(inner.call(req));
        }

        let cache = self.cache.clone();
        let sink = self.sink.clone();

        let (parts, body) = req.into_parts();
        let key = (self.key_builder)(&parts);
        let req = Request::from_parts(parts, body);

        Box::pin(async move {
            match cache.lookup_raw(&key).await {
                Ok(Some(raw)) => {
                    tracing::debug!(target: "windowgate::cache", key = %key, "hit");
                    emit_best_effort(sink, GateEvent::Cache(CacheEvent::Hit { key })).await;
                    let json = HeaderValue::from_static("application/json");
                    return Ok(tag(([(header::CONTENT_TYPE, json)], raw).into_response(), "HIT"));
                }
                Ok(None) => {}
                Err(err) => {
                    if let Some(rejection) = store_failure(&cache, sink.clone(), &key, err).await {
                        return Ok(rejection);
                    }
                }
            }

            emit_best_effort(sink.clone(), GateEvent::Cache(CacheEvent::Miss { key: key.clone() }))
                .await;
            let response = inner.call(req).await?;
            if method == Method::HEAD {
                return Ok(tag(response, "MISS"));
            }

            let skip = if !response.status().is_success() {
                Some(SkipReason::NotSuccess)
            } else if !is_json(&response) {
                Some(SkipReason::NotJson)
            } else {
                match response.body().size_hint().upper() {
                    Some(n) if n as usize <= cache.config().max_body_bytes() => None,
                    _ => Some(SkipReason::TooLarge),
                }
            };
            if let Some(reason) = skip {
                emit_best_effort(sink, GateEvent::Cache(CacheEvent::Skipped { key, reason })).await;
                return Ok(tag(response, "MISS"));
            }

            let (parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, cache.config().max_body_bytes()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(
                        target: "windowgate::cache",
                        key = %key,
                        error = %e,
                        "failed to read response body"
                    );
                    return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
                }
            };

            let text = std::str::from_utf8(&bytes)
                .ok()
                .filter(|s| serde_json::from_str::<Value>(s).is_ok());
            match text {
                Some(json) => match cache.insert_raw(&key, json).await {
                    Ok(()) => {
                        let stored = CacheEvent::Stored { key, bytes: bytes.len() };
                        emit_best_effort(sink, GateEvent::Cache(stored)).await;
                    }
                    Err(err) => {
                        let rejection = store_failure(&cache, sink.clone(), &key, err).await;
                        if let Some(rejection) = rejection {
                            return Ok(rejection);
                        }
                    }
                },
                None => {
                    let skipped = CacheEvent::Skipped { key, reason: SkipReason::InvalidJson };
                    emit_best_effort(sink, GateEvent::Cache(skipped)).await;
                }
            }

            Ok(tag(Response::from_parts(parts, Body::from(bytes)), "MISS"))
        })
    }
}

/// Apply the cache's failure mode to `err`; `Some` is the response to send instead.
async fn store_failure<S, T>(
    cache: &ResponseCache<S>,
    sink: T,
    key: &str,
    err: CacheError,
) -> Option<Response<Body>>
where
    S: CounterStore,
    T: GateSink,
    T::Future: Send + 'static,
{
    let error = err.to_string();
    let closed = cache.tolerate(key, err).is_err();
    if closed {
        tracing::error!(target: "windowgate::cache", key = %key, error = %error, "store failed");
    }
    let event = GateEvent::StoreFailure { component: COMPONENT, error, failed_open: !closed };
    emit_best_effort(sink, event).await;
    closed.then(|| Rejection::Unavailable { component: COMPONENT }.into_response())
}

fn is_json(response: &Response<Body>) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn tag(mut response: Response<Body>, status: &'static str) -> Response<Body> {
    response.headers_mut().insert(X_CACHE, HeaderValue::from_static(status));
    response
}
