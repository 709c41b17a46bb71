// Internal accounts / market data / FX / transactions service behind the gateway.
// Usage: cargo run --bin portfolio-service

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

use fintrack_api::accounts::{AccountLedger, PgAccountStore};
use fintrack_api::cache::{MemoryCache, RedisCache, SharedCache, TieredCache};
use fintrack_api::config::Config;
use fintrack_api::database;
use fintrack_api::fx::{FxManager, PgRateStore, RatesListener};
use fintrack_api::pricing::{PgPriceStore, PriceManager};
use fintrack_api::providers::{AlphaVantageProvider, CoinGeckoProvider, ExchangeRatesProvider};
use fintrack_api::services::{portfolio_router, PortfolioState};
use fintrack_api::shutdown::{self, Shutdown, SERVICE_GRACE};
use fintrack_api::telemetry;
use fintrack_api::transactions::PgTransactionStore;

const LOCAL_CACHE_TTL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env("portfolio")?;
    telemetry::init_tracing(config.is_production());
    info!("Starting portfolio service ({})...", config.environment);

    let db_pool = database::new_pool(&config.database_url).await?;
    database::run_migrations(&db_pool).await?;

    let shared: Arc<dyn SharedCache> = match RedisCache::connect(&config.redis_url).await {
        Ok(redis) => Arc::new(redis),
        Err(e) => {
            warn!("Redis unavailable ({}); using in-process cache only", e);
            Arc::new(MemoryCache::new())
        }
    };
    let cache: Arc<dyn SharedCache> = Arc::new(TieredCache::new(shared, LOCAL_CACHE_TTL));

    if config.alpha_vantage_api_key.is_empty() {
        warn!("ALPHA_VANTAGE_API_KEY is empty; stock prices will fail upstream");
    }
    if config.exchangerates_api_key.is_empty() {
        warn!("EXCHANGERATES_API_KEY is empty; FX refreshes will fail upstream");
    }
    let stocks = Arc::new(AlphaVantageProvider::new(
        &config.alpha_vantage_api_key,
        config.alpha_vantage_premium,
    ));
    let crypto = Arc::new(CoinGeckoProvider::new(&config.coingecko_api_url));
    let rates = Arc::new(ExchangeRatesProvider::new(
        &config.exchangerates_api_key,
        config.exchangerates_eur_only,
    ));

    let fx = Arc::new(FxManager::new(
        &config.fx_base_currency,
        rates.clone(),
        Arc::new(PgRateStore::new(db_pool.clone())),
        cache.clone(),
        config.fx_refresh_interval,
    ));
    let ledger = Arc::new(AccountLedger::new(
        Arc::new(PgAccountStore::new(db_pool.clone())),
        fx.clone(),
    ));
    let listener: Arc<dyn RatesListener> = ledger.clone();
    fx.set_listener(&listener);

    let prices = Arc::new(
        PriceManager::new(
            cache,
            Arc::new(PgPriceStore::new(db_pool.clone())),
            stocks,
            crypto,
            config.price_cache_ttl,
        )
        .with_fiat(rates)
        // Leave room for persisting the partial result inside the caller's deadline
        .with_batch_deadline(config.downstream_timeout.mul_f64(0.8)),
    );

    let state = PortfolioState {
        ledger,
        prices,
        fx: fx.clone(),
        transactions: Arc::new(PgTransactionStore::new(db_pool)),
    };
    let app = portfolio_router(state);

    let stop = Shutdown::new();
    let refresh = fx.spawn_refresh_loop(config.fx_refresh_interval, stop.subscribe());
    info!(
        "FX refresh every {:?} against {}",
        config.fx_refresh_interval, config.fx_base_currency
    );

    let addr = format!("0.0.0.0:{}", config.grpc_port);
    let tcp = TcpListener::bind(&addr).await?;
    info!("Portfolio service listening on {}", addr);

    let served = shutdown::serve(tcp, app, &stop, SERVICE_GRACE).await;
    if let Err(e) = refresh.await {
        warn!("FX refresh task ended abnormally: {}", e);
    }
    // Keeps the listener alive until the refresh loop is gone.
    drop(listener);
    served
}
