use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::{AuthService, GoogleOAuthClient, PasswordHasher, PgCredentialStore, TokenManager};
use crate::config::Config;
use crate::database::DatabasePool;
use crate::error::AppError;
use crate::gateway::{AccountsApi, FxApi, MarketApi, TransactionsApi};
use crate::handlers::{accounts, auth, fx, health, prices, transactions};
use crate::middleware::{auth_middleware, rate_limit_middleware, RateLimiter};
use crate::resilience::BreakerRegistry;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub accounts: Arc<dyn AccountsApi>,
    pub market: Arc<dyn MarketApi>,
    pub fx: Arc<dyn FxApi>,
    pub transactions: Arc<dyn TransactionsApi>,
    pub rate_limiter: RateLimiter,
    pub breakers: Arc<BreakerRegistry>,
}

impl AppState {
    pub fn downstream_timeout(&self) -> Duration {
        self.config.downstream_timeout
    }
}

/// Credential store, token signer and the optional identity providers.
pub fn build_auth_service(config: &Config, pool: DatabasePool) -> anyhow::Result<AuthService> {
    let store = Arc::new(PgCredentialStore::new(pool, config.email_case_insensitive));
    let mut service = AuthService::new(
        store.clone(),
        store.clone(),
        store,
        TokenManager::from_config(config),
        PasswordHasher::new(config.bcrypt_cost),
    );

    if config.google.is_configured() {
        service = service.with_google(Arc::new(GoogleOAuthClient::new(config.google.clone())?));
    } else {
        warn!("Google OAuth is not configured; /api/v1/auth/google/* will answer 503");
    }
    if config.telegram_configured() {
        service = service.with_telegram(config.telegram_bot_token.clone(), config.telegram_auth_max_age);
    }
    Ok(service)
}

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/telegram", post(auth::telegram_login))
        .route("/api/v1/auth/google/url", get(auth::google_url))
        .route("/api/v1/auth/google/callback", get(auth::google_callback));

    let protected = Router::new()
        .route("/api/v1/auth/me", get(auth::me))
        .route("/api/v1/auth/logout-all", post(auth::logout_all))
        .route("/api/v1/accounts", get(accounts::list_accounts).post(accounts::create_account))
        .route("/api/v1/accounts/:id", delete(accounts::delete_account))
        .route("/api/v1/accounts/:id/sub-accounts", post(accounts::create_sub_account))
        .route(
            "/api/v1/sub-accounts/:id",
            patch(accounts::update_sub_account).delete(accounts::delete_sub_account),
        )
        .route("/api/v1/net-worth", get(accounts::net_worth))
        .route("/api/v1/transactions/cash-flow", get(transactions::cash_flow))
        .route("/api/v1/prices/batch", post(prices::batch_prices))
        .route("/api/v1/prices/refresh", post(prices::refresh_prices))
        .route("/api/v1/prices/:symbol", get(prices::get_price))
        .route("/api/v1/prices/:symbol/history", get(prices::get_history))
        .route("/api/v1/assets/search", get(prices::search_assets))
        .route("/api/v1/fx/rates", get(fx::get_rates))
        .route("/api/v1/fx/convert", get(fx::convert))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(public)
        .merge(protected)
        .fallback(route_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
                    let request_id = req
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http",
                        method = %req.method(),
                        uri = %req.uri(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors)
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}

async fn route_not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ])
        .max_age(Duration::from_secs(3600))
}
