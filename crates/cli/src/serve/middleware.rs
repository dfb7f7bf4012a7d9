//! HTTP middleware: per-IP rate limiting and API key authentication.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use super::json_error;
use super::state::AppState;

/// Paths reachable without an API key (load balancer health checks).
const PUBLIC_PATHS: [&str; 1] = ["/health"];

/// Rate limiting middleware. Counts every request per client IP before routing.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    if let Err(retry_after) = state.rate_limiter.check(ip).await {
        warn!("Rate limit exceeded for {} on {}", ip, request.uri().path());
        let body = serde_json::json!({
            "error": "rate limit exceeded",
            "retry_after": retry_after,
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = retry_after.to_string().parse() {
            response.headers_mut().insert("retry-after", value);
        }
        return response;
    }
    next.run(request).await
}

/// The key a client presented: `Authorization: Bearer <key>` wins over
/// `X-API-Key: <key>`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer.or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
}

/// API key authentication middleware.
///
/// If `AGRITRACE_API_KEY` is set, every request except CORS preflights and
/// [`PUBLIC_PATHS`] must carry the key. A missing key is 401, a wrong one 403.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };
    if request.method() == Method::OPTIONS || PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let verdict = match presented_key(request.headers()) {
        Some(key) if key == expected => Ok(()),
        Some(_) => Err((StatusCode::FORBIDDEN, "invalid API key")),
        None => Err((StatusCode::UNAUTHORIZED, "authentication required")),
    };
    match verdict {
        Ok(()) => next.run(request).await,
        Err((status, message)) => {
            debug!("Rejected request to {}: {}", request.uri().path(), message);
            json_error(status, message).into_response()
        }
    }
}
