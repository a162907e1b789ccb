use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceExt;
use windowgate::CounterStore;

/// Send one request through `app` as if it came from `peer`, returning the body untouched.
pub async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    peer: Option<[u8; 4]>,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    if let Some(ip) = peer {
        req.extensions_mut().insert(ConnectInfo(SocketAddr::from((ip, 40_000))));
    }

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes)
}

/// Like [`send_raw`], with the body decoded as JSON (or a JSON string when it is not JSON).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    peer: Option<[u8; 4]>,
) -> (StatusCode, HeaderMap, Value) {
    let (status, headers, bytes) = send_raw(app, method, uri, peer).await;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, headers, body)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Value) {
    send(app, "GET", uri, None).await
}

/// A store whose every call fails, standing in for an unreachable backend.
#[derive(Debug, Clone, Default)]
pub struct DownStore;

#[async_trait]
impl CounterStore for DownStore {
    type Error = std::io::Error;

    async fn get(&self, _key: &str) -> Result<Option<String>, Self::Error> {
        Err(refused())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), Self::Error> {
        Err(refused())
    }

    async fn incr(&self, _key: &str) -> Result<i64, Self::Error> {
        Err(refused())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), Self::Error> {
        Err(refused())
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, Self::Error> {
        Err(refused())
    }
}

fn refused() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
}
