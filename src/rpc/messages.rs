//! Request and response messages of the portfolio service. Every user-scoped
//! request carries the caller's `user_id`; the service re-checks ownership.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{Account, HistoryPoint, SearchResult, SubAccount, Transaction};

pub mod paths {
    pub const LIST_ACCOUNTS: &str = "/accounts.v1.AccountService/ListAccounts";
    pub const CREATE_ACCOUNT: &str = "/accounts.v1.AccountService/CreateAccount";
    pub const DELETE_ACCOUNT: &str = "/accounts.v1.AccountService/DeleteAccount";
    pub const CREATE_SUB_ACCOUNT: &str = "/accounts.v1.AccountService/CreateSubAccount";
    pub const UPDATE_SUB_ACCOUNT: &str = "/accounts.v1.AccountService/UpdateSubAccount";
    pub const DELETE_SUB_ACCOUNT: &str = "/accounts.v1.AccountService/DeleteSubAccount";
    pub const GET_NET_WORTH: &str = "/accounts.v1.AccountService/GetNetWorth";

    pub const GET_PRICE: &str = "/market.v1.PriceService/GetPrice";
    pub const GET_PRICES: &str = "/market.v1.PriceService/GetPrices";
    pub const REFRESH_USER: &str = "/market.v1.PriceService/RefreshUser";
    pub const GET_HISTORY: &str = "/market.v1.PriceService/GetHistory";
    pub const SEARCH: &str = "/market.v1.PriceService/Search";

    pub const GET_RATES: &str = "/market.v1.FxService/GetRates";
    pub const CONVERT: &str = "/market.v1.FxService/Convert";
    pub const REFRESH_RATES: &str = "/market.v1.FxService/Refresh";

    pub const LIST_TRANSACTIONS: &str = "/transactions.v1.TransactionService/ListTransactions";

    pub const HEALTH_CHECK: &str = "/health.v1.Health/Check";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

// accounts.v1

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAccountsRequest {
    pub user_id: Uuid,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAccountsResponse {
    pub accounts: Vec<Account>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
    pub name: String,
    pub account_type: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountReply {
    pub account: Account,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAccountRequest {
    pub user_id: Uuid,
    pub account_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubAccountRequest {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub asset_class: String,
    /// Defaults to the parent account's currency.
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
}

/// Absent fields are left untouched; `Some(0.0)` really sets zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSubAccountRequest {
    pub user_id: Uuid,
    pub sub_account_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAccountReply {
    pub sub_account: SubAccount,
    pub account_total_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSubAccountRequest {
    pub user_id: Uuid,
    pub sub_account_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub user_id: Uuid,
}

/// Native-currency sums only; conversion into a single total is the caller's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetWorthByCurrency {
    pub balances: HashMap<String, f64>,
}

// market.v1

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPriceRequest {
    pub symbol: String,
    pub asset_class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPricesRequest {
    /// symbol → asset class
    pub symbols: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshUserRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub asset_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHistoryRequest {
    pub symbol: String,
    pub asset_class: String,
    #[serde(with = "crate::utils::date")]
    pub from: NaiveDate,
    #[serde(with = "crate::utils::date")]
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryReply {
    pub symbol: String,
    pub points: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub asset_class: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReply {
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRatesRequest {
    pub base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub amount: f64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRatesReply {
    pub base: String,
    pub updated: usize,
}

// transactions.v1

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTransactionsRequest {
    pub user_id: Uuid,
    #[serde(default, deserialize_with = "crate::utils::date::deserialize_opt")]
    pub from: Option<NaiveDate>,
    #[serde(default, deserialize_with = "crate::utils::date::deserialize_opt")]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub sub_account_id: Option<Uuid>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTransactionsResponse {
    pub transactions: Vec<Transaction>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

// health.v1

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckRequest {
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
}
