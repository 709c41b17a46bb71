//! Downstream seams of the gateway. Handlers talk to these traits; the RPC
//! implementation wraps every call in a per-service breaker and deadline.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{de::DeserializeOwned, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{BatchPrices, Conversion, PriceData, RateTable, RefreshOutcome};
use crate::resilience::{call, BreakerRegistry, CallError, CallOptions};
use crate::rpc::client::REQUEST_ID_HEADER;
use crate::rpc::messages::*;
use crate::rpc::{RpcClient, RpcError};

pub const ACCOUNT_SERVICE: &str = "account-service";
pub const PRICE_SERVICE: &str = "price-service";
pub const FX_SERVICE: &str = "fx-service";
pub const TRANSACTION_SERVICE: &str = "transaction-service";

pub type DownstreamResult<T> = Result<T, CallError<RpcError>>;

/// Per-request metadata forwarded to downstream services.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    pub request_id: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(CallContext { request_id })
    }
}

#[async_trait]
pub trait AccountsApi: Send + Sync {
    async fn list_accounts(&self, ctx: &CallContext, req: ListAccountsRequest) -> DownstreamResult<ListAccountsResponse>;
    async fn create_account(&self, ctx: &CallContext, req: CreateAccountRequest) -> DownstreamResult<AccountReply>;
    async fn delete_account(&self, ctx: &CallContext, req: DeleteAccountRequest) -> DownstreamResult<Empty>;
    async fn create_sub_account(&self, ctx: &CallContext, req: CreateSubAccountRequest) -> DownstreamResult<SubAccountReply>;
    async fn update_sub_account(&self, ctx: &CallContext, req: UpdateSubAccountRequest) -> DownstreamResult<SubAccountReply>;
    async fn delete_sub_account(&self, ctx: &CallContext, req: DeleteSubAccountRequest) -> DownstreamResult<Empty>;
    async fn net_worth(&self, ctx: &CallContext, req: UserRequest) -> DownstreamResult<NetWorthByCurrency>;
}

#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn get_price(&self, ctx: &CallContext, req: GetPriceRequest) -> DownstreamResult<PriceData>;
    async fn get_prices(&self, ctx: &CallContext, req: GetPricesRequest) -> DownstreamResult<BatchPrices>;
    async fn refresh_user(&self, ctx: &CallContext, req: RefreshUserRequest) -> DownstreamResult<RefreshOutcome>;
    async fn get_history(&self, ctx: &CallContext, req: GetHistoryRequest) -> DownstreamResult<HistoryReply>;
    async fn search(&self, ctx: &CallContext, req: SearchRequest) -> DownstreamResult<SearchReply>;
}

#[async_trait]
pub trait FxApi: Send + Sync {
    async fn get_rates(&self, ctx: &CallContext, base: &str) -> DownstreamResult<RateTable>;
    async fn convert(&self, ctx: &CallContext, req: ConvertRequest) -> DownstreamResult<Conversion>;
}

#[async_trait]
pub trait TransactionsApi: Send + Sync {
    async fn list_transactions(
        &self,
        ctx: &CallContext,
        req: ListTransactionsRequest,
    ) -> DownstreamResult<ListTransactionsResponse>;
}

/// All four APIs over one RPC connection to the portfolio service.
#[derive(Clone)]
pub struct RpcPortfolioClient {
    rpc: RpcClient,
    breakers: Arc<BreakerRegistry>,
    timeout: Duration,
}

impl RpcPortfolioClient {
    pub fn new(rpc: RpcClient, breakers: Arc<BreakerRegistry>, timeout: Duration) -> Self {
        Self { rpc, breakers, timeout }
    }

    async fn invoke<Req, Resp>(&self, breaker: &str, path: &str, ctx: &CallContext, req: Req) -> DownstreamResult<Resp>
    where
        Req: Serialize + Send + Sync,
        Resp: DeserializeOwned + Send,
    {
        let opts = CallOptions::new(breaker, self.timeout);
        call(&self.breakers, &opts, || self.rpc.unary(path, &req, ctx.request_id.as_deref())).await
    }
}

#[async_trait]
impl AccountsApi for RpcPortfolioClient {
    async fn list_accounts(&self, ctx: &CallContext, req: ListAccountsRequest) -> DownstreamResult<ListAccountsResponse> {
        self.invoke(ACCOUNT_SERVICE, paths::LIST_ACCOUNTS, ctx, req).await
    }

    async fn create_account(&self, ctx: &CallContext, req: CreateAccountRequest) -> DownstreamResult<AccountReply> {
        self.invoke(ACCOUNT_SERVICE, paths::CREATE_ACCOUNT, ctx, req).await
    }

    async fn delete_account(&self, ctx: &CallContext, req: DeleteAccountRequest) -> DownstreamResult<Empty> {
        self.invoke(ACCOUNT_SERVICE, paths::DELETE_ACCOUNT, ctx, req).await
    }

    async fn create_sub_account(&self, ctx: &CallContext, req: CreateSubAccountRequest) -> DownstreamResult<SubAccountReply> {
        self.invoke(ACCOUNT_SERVICE, paths::CREATE_SUB_ACCOUNT, ctx, req).await
    }

    async fn update_sub_account(&self, ctx: &CallContext, req: UpdateSubAccountRequest) -> DownstreamResult<SubAccountReply> {
        self.invoke(ACCOUNT_SERVICE, paths::UPDATE_SUB_ACCOUNT, ctx, req).await
    }

    async fn delete_sub_account(&self, ctx: &CallContext, req: DeleteSubAccountRequest) -> DownstreamResult<Empty> {
        self.invoke(ACCOUNT_SERVICE, paths::DELETE_SUB_ACCOUNT, ctx, req).await
    }

    async fn net_worth(&self, ctx: &CallContext, req: UserRequest) -> DownstreamResult<NetWorthByCurrency> {
        self.invoke(ACCOUNT_SERVICE, paths::GET_NET_WORTH, ctx, req).await
    }
}

#[async_trait]
impl MarketApi for RpcPortfolioClient {
    async fn get_price(&self, ctx: &CallContext, req: GetPriceRequest) -> DownstreamResult<PriceData> {
        self.invoke(PRICE_SERVICE, paths::GET_PRICE, ctx, req).await
    }

    async fn get_prices(&self, ctx: &CallContext, req: GetPricesRequest) -> DownstreamResult<BatchPrices> {
        self.invoke(PRICE_SERVICE, paths::GET_PRICES, ctx, req).await
    }

    async fn refresh_user(&self, ctx: &CallContext, req: RefreshUserRequest) -> DownstreamResult<RefreshOutcome> {
        self.invoke(PRICE_SERVICE, paths::REFRESH_USER, ctx, req).await
    }

    async fn get_history(&self, ctx: &CallContext, req: GetHistoryRequest) -> DownstreamResult<HistoryReply> {
        self.invoke(PRICE_SERVICE, paths::GET_HISTORY, ctx, req).await
    }

    async fn search(&self, ctx: &CallContext, req: SearchRequest) -> DownstreamResult<SearchReply> {
        self.invoke(PRICE_SERVICE, paths::SEARCH, ctx, req).await
    }
}

#[async_trait]
impl FxApi for RpcPortfolioClient {
    async fn get_rates(&self, ctx: &CallContext, base: &str) -> DownstreamResult<RateTable> {
        let req = GetRatesRequest { base: base.to_string() };
        self.invoke(FX_SERVICE, paths::GET_RATES, ctx, req).await
    }

    async fn convert(&self, ctx: &CallContext, req: ConvertRequest) -> DownstreamResult<Conversion> {
        self.invoke(FX_SERVICE, paths::CONVERT, ctx, req).await
    }
}

#[async_trait]
impl TransactionsApi for RpcPortfolioClient {
    async fn list_transactions(
        &self,
        ctx: &CallContext,
        req: ListTransactionsRequest,
    ) -> DownstreamResult<ListTransactionsResponse> {
        self.invoke(TRANSACTION_SERVICE, paths::LIST_TRANSACTIONS, ctx, req).await
    }
}
