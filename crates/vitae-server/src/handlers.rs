use axum::{
    Json,
    body::Body,
    extract::{FromRequest, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use vitae_cache::auth_identity;

use crate::middleware::{client_ip, enforce};
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    cache: CacheHealth,
}

#[derive(Serialize)]
struct CacheHealth {
    backend: &'static str,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready when the active cache backend answers.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.cache.backend().as_str();
    let (healthy, error) = match state.cache.health_check().await {
        Ok(healthy) => (healthy, None),
        Err(e) => (false, Some(e.to_string())),
    };

    let (code, status) = if healthy {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        code,
        Json(ReadyResponse {
            status,
            cache: CacheHealth {
                backend,
                healthy,
                error,
            },
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub code: String,
}

/// `POST /auth/otp/verify`: consume a one-time passcode.
///
/// Limited per client address and account by the auth limiter. A code
/// verifies at most once.
pub async fn verify_otp(State(state): State<AppState>, req: Request<Body>) -> Response {
    let ip = client_ip(&req, state.trust_forwarded_headers);
    let Json(body) = match Json::<VerifyOtpRequest>::from_request(req, &()).await {
        Ok(body) => body,
        Err(rejection) => return rejection.into_response(),
    };

    let email = body.email.trim().to_ascii_lowercase();
    if let Err(refused) = enforce(&state.auth_limiter, &auth_identity(&ip, &email)).await {
        return refused;
    }

    match state.challenges.verify_otp(&email, &body.code).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "verified": true }))).into_response(),
        Ok(false) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "code": "INVALID_CODE",
                    "message": "Invalid or expired code"
                }
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "otp verification failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": {
                        "code": "SERVICE_UNAVAILABLE",
                        "message": "Service temporarily unavailable"
                    }
                })),
            )
                .into_response()
        }
    }
}
