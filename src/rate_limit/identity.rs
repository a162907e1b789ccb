//! Which client a request counts against.

use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::SocketAddr;

/// Identifier used when neither a peer address nor a forwarded address is known.
pub const GLOBAL_IDENTIFIER: &str = "global";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Derive the rate-limit identifier for `req`.
///
/// Order: the peer address from `ConnectInfo<SocketAddr>` (present when the server is
/// started with `into_make_service_with_connect_info`), then the first non-empty entry of
/// `x-forwarded-for`, then [`GLOBAL_IDENTIFIER`], which puts all such requests in one bucket.
pub fn client_identifier<B>(req: &Request<B>) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    req.headers()
        .get(FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| GLOBAL_IDENTIFIER.to_string())
}
