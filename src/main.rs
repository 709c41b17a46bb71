use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use fintrack_api::app::{self, AppState};
use fintrack_api::background::BackgroundScheduler;
use fintrack_api::cache::{MemoryCache, RedisCache, SharedCache};
use fintrack_api::config::Config;
use fintrack_api::database;
use fintrack_api::gateway::RpcPortfolioClient;
use fintrack_api::middleware::RateLimiter;
use fintrack_api::resilience::BreakerRegistry;
use fintrack_api::rpc::RpcClient;
use fintrack_api::shutdown::{self, Shutdown, GATEWAY_GRACE};
use fintrack_api::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Arc::new(Config::from_env("gateway")?);
    telemetry::init_tracing(config.is_production());
    info!("Starting FinTrack gateway ({})...", config.environment);

    let db_pool = database::new_pool(&config.database_url).await?;
    database::run_migrations(&db_pool).await?;
    info!("Database ready");

    let shared: Arc<dyn SharedCache> = match RedisCache::connect(&config.redis_url).await {
        Ok(redis) => Arc::new(redis),
        Err(e) => {
            warn!("Redis unavailable ({}); falling back to in-process cache", e);
            Arc::new(MemoryCache::new())
        }
    };
    // Counters must be shared across gateway instances, so no local tier here.
    let rate_limiter = RateLimiter::new(shared, config.rate_limit_per_minute, config.auth_rate_limit_per_minute);

    let auth = Arc::new(app::build_auth_service(&config, db_pool.clone())?);

    let breakers = BreakerRegistry::global();
    let rpc = RpcClient::new(&config.portfolio_service_url, config.downstream_timeout)?;
    let portfolio = Arc::new(RpcPortfolioClient::new(rpc, breakers.clone(), config.downstream_timeout));
    info!("Portfolio service at {}", config.portfolio_service_url);

    let scheduler = BackgroundScheduler::new(auth.clone()).await?;

    let state = AppState {
        config: config.clone(),
        auth,
        accounts: portfolio.clone(),
        market: portfolio.clone(),
        fx: portfolio.clone(),
        transactions: portfolio,
        rate_limiter,
        breakers,
    };
    let app = app::build_router(state);

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on http://{}", addr);

    let stop = Shutdown::new();
    let served = shutdown::serve(listener, app, &stop, GATEWAY_GRACE).await;
    scheduler.shutdown().await;
    served
}
