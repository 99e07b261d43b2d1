use std::net::SocketAddr;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use vitae_cache::{CacheService, ChallengeStore, RateLimiter};

use crate::{config::AppConfig, handlers, middleware as app_middleware};

/// Shared handles injected into every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: CacheService,
    pub challenges: ChallengeStore,
    pub api_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
    pub trust_forwarded_headers: bool,
}

impl AppState {
    pub fn new(cache: CacheService, cfg: &AppConfig) -> Self {
        Self {
            challenges: ChallengeStore::from_config(cache.clone(), &cfg.cache),
            api_limiter: RateLimiter::new(cache.clone(), cfg.rate_limiting.api),
            auth_limiter: RateLimiter::new(cache.clone(), cfg.rate_limiting.auth),
            trust_forwarded_headers: cfg.server.trust_forwarded_headers,
            cache,
        }
    }
}

/// Health endpoints, the auth routes and `api` routes under the general
/// rate limit.
///
/// Health endpoints are not rate limited. Auth routes use the auth limiter
/// instead of the general one.
pub fn build_app(state: AppState, api: Router<AppState>) -> Router {
    let limited = api.layer(middleware::from_fn_with_state(
        state.clone(),
        app_middleware::api_rate_limit,
    ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/auth/otp/verify", post(handlers::verify_otp))
        .merge(limited)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct VitaeServer {
    addr: SocketAddr,
    app: Router,
    cache: CacheService,
}

pub struct ServerBuilder {
    config: AppConfig,
    api: Router<AppState>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            api: Router::new(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Routes served under the general API rate limit.
    pub fn with_api_routes(mut self, api: Router<AppState>) -> Self {
        self.api = api;
        self
    }

    /// Connect the cache (falling back to the local store if Redis is
    /// unreachable) and assemble the router.
    pub async fn build(self) -> VitaeServer {
        let cache = CacheService::connect(&self.config.redis, &self.config.cache).await;
        tracing::info!(backend = %cache.backend(), "Cache service ready");

        let state = AppState::new(cache.clone(), &self.config);
        VitaeServer {
            addr: self.config.addr(),
            app: build_app(state, self.api),
            cache,
        }
    }
}

impl VitaeServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let served = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        self.cache.shutdown().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
