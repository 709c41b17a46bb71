//! RPC surface of the portfolio service: accounts, prices, FX and transaction
//! listing behind one router.

use axum::{extract::State, routing::post, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::accounts::{AccountLedger, LedgerError, NewSubAccount, SubAccountPatch};
use crate::database::StoreError;
use crate::fx::{FxError, FxManager};
use crate::models::{BatchPrices, Conversion, PriceData, RateTable, RefreshOutcome};
use crate::pricing::{PriceError, PriceManager};
use crate::providers::ProviderError;
use crate::rpc::messages::*;
use crate::rpc::server::{deadline_middleware, unimplemented};
use crate::rpc::{RpcError, RpcReply, RpcRequest, RpcResult};
use crate::transactions::{normalize_page, TransactionFilter, TransactionStore};

#[derive(Clone)]
pub struct PortfolioState {
    pub ledger: Arc<AccountLedger>,
    pub prices: Arc<PriceManager>,
    pub fx: Arc<FxManager>,
    pub transactions: Arc<dyn TransactionStore>,
}

pub fn router(state: PortfolioState) -> Router {
    Router::new()
        .route(paths::LIST_ACCOUNTS, post(list_accounts))
        .route(paths::CREATE_ACCOUNT, post(create_account))
        .route(paths::DELETE_ACCOUNT, post(delete_account))
        .route(paths::CREATE_SUB_ACCOUNT, post(create_sub_account))
        .route(paths::UPDATE_SUB_ACCOUNT, post(update_sub_account))
        .route(paths::DELETE_SUB_ACCOUNT, post(delete_sub_account))
        .route(paths::GET_NET_WORTH, post(get_net_worth))
        .route(paths::GET_PRICE, post(get_price))
        .route(paths::GET_PRICES, post(get_prices))
        .route(paths::REFRESH_USER, post(refresh_user))
        .route(paths::GET_HISTORY, post(get_history))
        .route(paths::SEARCH, post(search))
        .route(paths::GET_RATES, post(get_rates))
        .route(paths::CONVERT, post(convert))
        .route(paths::REFRESH_RATES, post(refresh_rates))
        .route(paths::LIST_TRANSACTIONS, post(list_transactions))
        .route(paths::HEALTH_CHECK, post(health_check))
        .fallback(unimplemented)
        .layer(axum::middleware::from_fn(deadline_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// accounts.v1

async fn list_accounts(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<ListAccountsRequest>,
) -> RpcResult<ListAccountsResponse> {
    let (accounts, total, page, page_size) = state.ledger.list_accounts(req.user_id, req.page, req.page_size).await?;
    Ok(RpcReply(ListAccountsResponse {
        accounts,
        total,
        page,
        page_size,
    }))
}

async fn create_account(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<CreateAccountRequest>,
) -> RpcResult<AccountReply> {
    let account = state
        .ledger
        .create_account(req.user_id, &req.name, &req.account_type, &req.currency)
        .await?;
    Ok(RpcReply(AccountReply { account }))
}

async fn delete_account(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<DeleteAccountRequest>,
) -> RpcResult<Empty> {
    state.ledger.delete_account(req.user_id, req.account_id).await?;
    Ok(RpcReply(Empty {}))
}

async fn create_sub_account(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<CreateSubAccountRequest>,
) -> RpcResult<SubAccountReply> {
    let input = NewSubAccount {
        account_id: req.account_id,
        name: req.name,
        asset_class: req.asset_class,
        currency: req.currency,
        balance: req.balance,
        symbol: req.symbol,
        quantity: req.quantity,
    };
    let (sub_account, account_total_balance) = state.ledger.create_sub_account(req.user_id, input).await?;
    Ok(RpcReply(SubAccountReply {
        sub_account,
        account_total_balance,
    }))
}

async fn update_sub_account(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<UpdateSubAccountRequest>,
) -> RpcResult<SubAccountReply> {
    let patch = SubAccountPatch {
        name: req.name,
        balance: req.balance,
        quantity: req.quantity,
        symbol: req.symbol,
    };
    let (sub_account, account_total_balance) = state
        .ledger
        .update_sub_account(req.user_id, req.sub_account_id, patch)
        .await?;
    Ok(RpcReply(SubAccountReply {
        sub_account,
        account_total_balance,
    }))
}

async fn delete_sub_account(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<DeleteSubAccountRequest>,
) -> RpcResult<Empty> {
    state.ledger.delete_sub_account(req.user_id, req.sub_account_id).await?;
    Ok(RpcReply(Empty {}))
}

async fn get_net_worth(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<UserRequest>,
) -> RpcResult<NetWorthByCurrency> {
    let balances = state.ledger.net_worth_by_currency(req.user_id).await?;
    Ok(RpcReply(NetWorthByCurrency { balances }))
}

// market.v1

async fn get_price(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<GetPriceRequest>,
) -> RpcResult<PriceData> {
    Ok(RpcReply(state.prices.get_price(&req.symbol, &req.asset_class).await?))
}

async fn get_prices(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<GetPricesRequest>,
) -> RpcResult<BatchPrices> {
    if req.symbols.is_empty() {
        return Err(RpcError::invalid_argument("at least one symbol is required"));
    }
    Ok(RpcReply(state.prices.get_prices(&req.symbols).await))
}

async fn refresh_user(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<RefreshUserRequest>,
) -> RpcResult<RefreshOutcome> {
    let outcome = state.prices.refresh_user(req.user_id, req.asset_ids.as_deref()).await?;
    Ok(RpcReply(outcome))
}

async fn get_history(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<GetHistoryRequest>,
) -> RpcResult<HistoryReply> {
    let points = state
        .prices
        .get_history(&req.symbol, &req.asset_class, req.from, req.to)
        .await?;
    Ok(RpcReply(HistoryReply {
        symbol: req.symbol.trim().to_uppercase(),
        points,
    }))
}

async fn search(State(state): State<PortfolioState>, RpcRequest(req): RpcRequest<SearchRequest>) -> RpcResult<SearchReply> {
    let results = state
        .prices
        .search(&req.query, req.asset_class.as_deref(), req.limit.map(|l| l as usize))
        .await?;
    Ok(RpcReply(SearchReply { results }))
}

async fn get_rates(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<GetRatesRequest>,
) -> RpcResult<RateTable> {
    Ok(RpcReply(state.fx.get_rates(&req.base).await?))
}

async fn convert(State(state): State<PortfolioState>, RpcRequest(req): RpcRequest<ConvertRequest>) -> RpcResult<Conversion> {
    Ok(RpcReply(state.fx.convert(req.amount, &req.from, &req.to).await?))
}

async fn refresh_rates(State(state): State<PortfolioState>, RpcRequest(_): RpcRequest<Empty>) -> RpcResult<RefreshRatesReply> {
    let table = state.fx.refresh_rates().await?;
    Ok(RpcReply(RefreshRatesReply {
        base: table.base.clone(),
        updated: table.rates.len(),
    }))
}

// transactions.v1

async fn list_transactions(
    State(state): State<PortfolioState>,
    RpcRequest(req): RpcRequest<ListTransactionsRequest>,
) -> RpcResult<ListTransactionsResponse> {
    let filter = TransactionFilter::parse(req.from, req.to, req.transaction_type.as_deref(), req.sub_account_id)
        .map_err(RpcError::invalid_argument)?;
    let (page, page_size) = normalize_page(req.page, req.page_size);
    let (transactions, total) = state
        .transactions
        .list(req.user_id, &filter, page, page_size)
        .await
        .map_err(store_status)?;
    Ok(RpcReply(ListTransactionsResponse {
        transactions,
        total,
        page,
        page_size,
    }))
}

// health.v1

async fn health_check(RpcRequest(_): RpcRequest<HealthCheckRequest>) -> RpcResult<HealthCheckResponse> {
    Ok(RpcReply(HealthCheckResponse {
        status: "SERVING".to_string(),
    }))
}

fn store_status(err: StoreError) -> RpcError {
    match err {
        StoreError::NotFound => RpcError::not_found(err.to_string()),
        StoreError::Conflict(_) => RpcError::already_exists(err.to_string()),
        StoreError::Database(e) => {
            error!("Database error: {}", e);
            RpcError::internal("database error")
        }
    }
}

fn provider_status(err: ProviderError) -> RpcError {
    match err {
        ProviderError::NotFound(_) => RpcError::not_found(err.to_string()),
        ProviderError::RateLimited { .. } => RpcError::new(crate::rpc::Code::ResourceExhausted, err.to_string()),
        ProviderError::Timeout { .. } | ProviderError::Http { .. } => {
            warn!("Upstream provider failure: {}", err);
            RpcError::unavailable(err.to_string())
        }
        ProviderError::Unsupported(_) => RpcError::invalid_argument(err.to_string()),
        ProviderError::Parse { .. } => {
            error!("Provider payload error: {}", err);
            RpcError::internal(err.to_string())
        }
    }
}

fn fx_status(err: FxError) -> RpcError {
    match err {
        FxError::InvalidInput(message) => RpcError::invalid_argument(message),
        FxError::NotFound(_) => RpcError::not_found(err.to_string()),
        FxError::Provider(e) => provider_status(e),
        FxError::Store(e) => store_status(e),
    }
}

impl From<LedgerError> for RpcError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidInput(message) => RpcError::invalid_argument(message),
            LedgerError::NotFound(_) => RpcError::not_found(err.to_string()),
            // A total that cannot be converted is not persisted.
            LedgerError::Fx(FxError::InvalidInput(message)) => RpcError::invalid_argument(message),
            LedgerError::Fx(e) => RpcError::failed_precondition(format!("exchange rate unavailable: {}", e)),
            LedgerError::Store(e) => store_status(e),
        }
    }
}

impl From<PriceError> for RpcError {
    fn from(err: PriceError) -> Self {
        match err {
            PriceError::InvalidInput(message) => RpcError::invalid_argument(message),
            PriceError::NotFound(_) => RpcError::not_found(err.to_string()),
            PriceError::Provider(e) => provider_status(e),
            PriceError::Store(e) => store_status(e),
        }
    }
}

impl From<FxError> for RpcError {
    fn from(err: FxError) -> Self {
        fx_status(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Code;

    #[test]
    fn missing_rate_blocks_the_mutation() {
        let err: RpcError = LedgerError::Fx(FxError::NotFound("EUR/JPY".into())).into();
        assert_eq!(err.code, Code::FailedPrecondition);
    }

    #[test]
    fn foreign_resources_are_not_found() {
        let err: RpcError = LedgerError::NotFound("account").into();
        assert_eq!(err.code, Code::NotFound);
        assert_eq!(err.message, "account not found");
    }

    #[test]
    fn provider_outages_are_retryable() {
        let err: RpcError = PriceError::Provider(ProviderError::Timeout { provider: "coingecko" }).into();
        assert_eq!(err.code, Code::Unavailable);
        let err: RpcError = PriceError::Provider(ProviderError::RateLimited { provider: "alpha_vantage" }).into();
        assert_eq!(err.code, Code::ResourceExhausted);
    }
}
