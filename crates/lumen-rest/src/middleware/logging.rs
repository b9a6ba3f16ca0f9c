//! Request logging middleware.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Probe paths logged at debug level only.
const PROBE_PATHS: [&str; 3] = ["/health", "/ready", "/live"];

/// Logs one line per request once the response head is ready.
///
/// For event streams the duration covers the time to the response head, not
/// the life of the stream.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_millis();
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        warn!(target: "http", method = %method, uri = %uri, status, duration_ms, "HTTP request failed");
    } else if PROBE_PATHS.contains(&uri.path()) {
        debug!(target: "http", method = %method, uri = %uri, status, duration_ms, "Probe request completed");
    } else {
        info!(target: "http", method = %method, uri = %uri, status, duration_ms, "HTTP request completed");
    }

    response
}
