//! Structured events emitted by the gates.
//!
//! Both layers report what they decided through a [`GateSink`], which is just a
//! `tower::Service<GateEvent>`. Sinks are best-effort: a sink that is not ready or fails
//! never affects the request being gated.
//!
//! ```rust
//! use windowgate::telemetry::{GateEvent, MemorySink, RateLimitEvent};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! let event = GateEvent::RateLimit(RateLimitEvent::Rejected {
//!     identifier: "1.2.3.4".into(),
//!     count: 4,
//!     limit: 3,
//! });
//! sink.call(event.clone()).await.unwrap();
//! assert_eq!(sink.events(), vec![event]);
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::Service;

type SinkFuture = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// A consumer of gate events.
pub trait GateSink:
    Service<GateEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Deliver `event` if the sink becomes ready; errors are dropped.
pub async fn emit_best_effort<S>(sink: S, event: GateEvent)
where
    S: Service<GateEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    RateLimit(RateLimitEvent),
    Cache(CacheEvent),
    /// A store call failed and the gate fell back to its failure mode.
    StoreFailure { component: &'static str, error: String, failed_open: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitEvent {
    Allowed { identifier: String, count: u64, limit: u64 },
    Rejected { identifier: String, count: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Served from the store; the handler did not run.
    Hit { key: String },
    Miss { key: String },
    /// A fresh response body was written to the store.
    Stored { key: String, bytes: usize },
    /// The handler's response was forwarded without being cached.
    Skipped { key: String, reason: SkipReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotSuccess,
    NotJson,
    TooLarge,
    InvalidJson,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NotSuccess => "non_success_status",
            SkipReason::NotJson => "non_json_content_type",
            SkipReason::TooLarge => "body_too_large",
            SkipReason::InvalidJson => "invalid_json_body",
        };
        f.write_str(s)
    }
}

impl fmt::Display for GateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateEvent::RateLimit(RateLimitEvent::Allowed { identifier, count, limit }) => {
                write!(f, "RateLimit::Allowed(id={}, count={}/{})", identifier, count, limit)
            }
            GateEvent::RateLimit(RateLimitEvent::Rejected { identifier, count, limit }) => {
                write!(f, "RateLimit::Rejected(id={}, count={}/{})", identifier, count, limit)
            }
            GateEvent::Cache(CacheEvent::Hit { key }) => write!(f, "Cache::Hit(key={})", key),
            GateEvent::Cache(CacheEvent::Miss { key }) => write!(f, "Cache::Miss(key={})", key),
            GateEvent::Cache(CacheEvent::Stored { key, bytes }) => {
                write!(f, "Cache::Stored(key={}, bytes={})", key, bytes)
            }
            GateEvent::Cache(CacheEvent::Skipped { key, reason }) => {
                write!(f, "Cache::Skipped(key={}, reason={})", key, reason)
            }
            GateEvent::StoreFailure { component, error, failed_open } => write!(
                f,
                "StoreFailure(component={}, failed_open={}, error={})",
                component, failed_open, error
            ),
        }
    }
}

/// Discards every event. The default sink for both layers.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GateEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GateEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl GateSink for NullSink {
    type SinkError = Infallible;
}

/// Logs each event through `tracing` at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GateEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GateEvent) -> Self::Future {
        tracing::info!(target: "windowgate::telemetry", event = %event, "gate_event");
        Box::pin(async { Ok(()) })
    }
}

impl GateSink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory, evicting the oldest past `capacity`. Meant for tests.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GateEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<GateEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GateEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GateEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GateEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl GateSink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(key: &str) -> GateEvent {
        GateEvent::Cache(CacheEvent::Hit { key: key.into() })
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        emit_best_effort(sink.clone(), hit("a")).await;
        emit_best_effort(sink.clone(), hit("b")).await;
        emit_best_effort(sink.clone(), hit("c")).await;

        assert_eq!(sink.events(), vec![hit("b"), hit("c")]);
        assert_eq!(sink.evicted(), 1);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn null_and_log_sinks_accept_events() {
        emit_best_effort(NullSink, hit("x")).await;
        emit_best_effort(LogSink, hit("x")).await;
    }

    #[test]
    fn display_is_compact() {
        let event = GateEvent::Cache(CacheEvent::Skipped {
            key: "/posts".into(),
            reason: SkipReason::TooLarge,
        });
        assert_eq!(event.to_string(), "Cache::Skipped(key=/posts, reason=body_too_large)");

        let failure = GateEvent::StoreFailure {
            component: "response cache",
            error: "refused".into(),
            failed_open: true,
        };
        assert!(failure.to_string().contains("failed_open=true"));
    }
}
