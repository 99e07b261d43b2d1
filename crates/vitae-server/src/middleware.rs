use std::net::{IpAddr, SocketAddr};

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use time::OffsetDateTime;
use vitae_cache::{RateLimitDecision, RateLimiter, client_identity};

use crate::server::AppState;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

// =============================================================================
// Rate Limit Middleware
// =============================================================================

/// General API rate limiting, keyed by client address.
///
/// Every response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
/// `X-RateLimit-Reset` (unix timestamp). A denied request gets
/// 429 Too Many Requests with `Retry-After`. If the cache backend cannot
/// answer, the request is refused with 503 rather than let through.
pub async fn api_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req, state.trust_forwarded_headers);
    let identity = client_identity(&ip);

    match enforce(&state.api_limiter, &identity).await {
        Ok(decision) => {
            let now = state.cache.clock().now();
            let mut response = next.run(req).await;
            apply_rate_limit_headers(response.headers_mut(), &decision, now);
            response
        }
        Err(response) => response,
    }
}

/// Run one limiter check and turn a refusal into a ready-made response.
///
/// Handlers for authentication endpoints call this with the auth limiter
/// and [`vitae_cache::auth_identity`], since the account part of the
/// identity is only known after the body is parsed.
pub async fn enforce(
    limiter: &RateLimiter,
    identity: &str,
) -> Result<RateLimitDecision, Response> {
    let now = limiter.cache().clock().now();
    match limiter.check(identity).await {
        Ok(decision) if decision.allowed => Ok(decision),
        Ok(decision) => Err(too_many_requests(&decision, now)),
        Err(e) => {
            tracing::warn!(identity = %identity, error = %e, "rate limit check failed, refusing request");
            Err(service_unavailable())
        }
    }
}

/// Resolve the caller's address.
///
/// Forwarded headers are only consulted when trusted. Falls back to the
/// socket address, then to `"unknown"` so all unidentifiable callers share
/// one window.
pub fn client_ip(req: &Request<Body>, trust_forwarded_headers: bool) -> String {
    if trust_forwarded_headers {
        if let Some(ip) = forwarded_ip(req.headers()) {
            return ip;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// First valid address from `X-Forwarded-For` (leftmost hop), then
/// `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header_ip = |name: &str, first_hop: bool| {
        let value = headers.get(name)?.to_str().ok()?;
        let candidate = if first_hop {
            value.split(',').next()?
        } else {
            value
        };
        let ip: IpAddr = candidate.trim().parse().ok()?;
        Some(ip.to_string())
    };

    header_ip("x-forwarded-for", true).or_else(|| header_ip("x-real-ip", false))
}

fn apply_rate_limit_headers(
    headers: &mut HeaderMap,
    decision: &RateLimitDecision,
    now: OffsetDateTime,
) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at(now)));
}

fn too_many_requests(decision: &RateLimitDecision, now: OffsetDateTime) -> Response {
    let body = json!({
        "error": {
            "code": "RATE_LIMITED",
            "message": "Too many requests, please try again later",
            "retry_after_seconds": decision.reset_in_secs
        }
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, decision, now);
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.reset_in_secs));
    response
}

fn service_unavailable() -> Response {
    let body = json!({
        "error": {
            "code": "SERVICE_UNAVAILABLE",
            "message": "Service temporarily unavailable"
        }
    });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_forwarded_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("198.51.100.2"));
    }

    #[test]
    fn test_forwarded_ip_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(forwarded_ip(&headers), None);
    }

    #[test]
    fn test_invalid_forwarded_for_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static(" 198.51.100.2 "));
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("198.51.100.2"));

        headers.insert("x-real-ip", HeaderValue::from_static("garbage"));
        assert_eq!(forwarded_ip(&headers), None);
    }

    #[test]
    fn test_client_ip_ignores_untrusted_headers() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, false), "unknown");
        assert_eq!(client_ip(&req, true), "203.0.113.7");
    }
}
