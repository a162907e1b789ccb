use crate::error::Rejection;
use crate::failure::FailureMode;
use crate::rate_limit::{client_identifier, Decision, RateLimiter, LIMIT_HEADER, REMAINING_HEADER};
use crate::telemetry::{emit_best_effort, GateEvent, GateSink, NullSink, RateLimitEvent};
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

const COMPONENT: &str = "rate limiter";

/// A layer that counts every request against a [`RateLimiter`].
///
/// Denied requests get a 429 JSON body and never reach the inner service. When the limiter
/// itself fails (store down), the [`FailureMode`] decides: `FailClosed` (default) answers
/// 503, `FailOpen` lets the request through unmetered.
#[derive(Debug)]
pub struct RateLimitLayer<L, T = NullSink> {
    limiter: Arc<L>,
    on_store_error: FailureMode,
    sink: T,
}

impl<L, T: Clone> Clone for RateLimitLayer<L, T> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            on_store_error: self.on_store_error,
            sink: self.sink.clone(),
        }
    }
}

impl<L> RateLimitLayer<L> {
    pub fn new(limiter: L) -> Self {
        Self { limiter: Arc::new(limiter), on_store_error: FailureMode::FailClosed, sink: NullSink }
    }
}

impl<L, T> RateLimitLayer<L, T> {
    pub fn on_store_error(mut self, mode: FailureMode) -> Self {
        self.on_store_error = mode;
        self
    }

    /// Report decisions to `sink`.
    pub fn with_sink<T2>(self, sink: T2) -> RateLimitLayer<L, T2> {
        RateLimitLayer { limiter: self.limiter, on_store_error: self.on_store_error, sink }
    }
}

impl<S, L, T> Layer<S> for RateLimitLayer<L, T>
where
    L: RateLimiter + 'static,
    T: Clone,
{
    type Service = RateLimitService<S, L, T>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            on_store_error: self.on_store_error,
            sink: self.sink.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
#[derive(Debug)]
pub struct RateLimitService<S, L, T = NullSink> {
    inner: S,
    limiter: Arc<L>,
    on_store_error: FailureMode,
    sink: T,
}

impl<S: Clone, L, T: Clone> Clone for RateLimitService<S, L, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            on_store_error: self.on_store_error,
            sink: self.sink.clone(),
        }
    }
}

impl<S, L, T, B> Service<Request<B>> for RateLimitService<S, L, T>
where
    S: Service<Request<B>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    L: RateLimiter + 'static,
    T: GateSink,
    T::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Keep the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();
        let on_store_error = self.on_store_error;
        let sink = self.sink.clone();

        Box::pin(async move {
            let identifier = client_identifier(&req);

            let decision = match limiter.acquire(&identifier).await {
                Ok(decision) => decision,
                Err(e) => {
                    let error = e.to_string();
                    let failed_open = on_store_error.is_open();
                    tracing::warn!(
                        target: "windowgate::rate_limit",
                        identifier = %identifier,
                        error = %error,
                        failed_open,
                        "rate limiter store failed"
                    );
                    emit_best_effort(
                        sink,
                        GateEvent::StoreFailure { component: COMPONENT, error, failed_open },
                    )
                    .await;
                    if failed_open {
                        return inner.call(req).await;
                    }
                    return Ok(Rejection::Unavailable { component: COMPONENT }.into_response());
                }
            };

            match decision {
                Decision::Allowed { count, limit } => {
                    let remaining = limit.saturating_sub(count);
                    emit_best_effort(
                        sink,
                        GateEvent::RateLimit(RateLimitEvent::Allowed { identifier, count, limit }),
                    )
                    .await;
                    let mut response = inner.call(req).await?;
                    let headers = response.headers_mut();
                    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
                    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
                    Ok(response)
                }
                Decision::Denied { count, limit, window } => {
                    tracing::info!(
                        target: "windowgate::rate_limit",
                        identifier = %identifier,
                        count,
                        limit,
                        "request rejected"
                    );
                    emit_best_effort(
                        sink,
                        GateEvent::RateLimit(RateLimitEvent::Rejected { identifier, count, limit }),
                    )
                    .await;
                    Ok(Rejection::RateLimited { limit, window }.into_response())
                }
            }
        })
    }
}
