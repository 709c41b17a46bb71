//! Composite views. Each one fetches its inputs concurrently under a single
//! deadline; the primary input failing fails the view, secondary inputs
//! degrade into `warnings`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use super::clients::{AccountsApi, CallContext, FxApi, TransactionsApi};
use crate::error::AppError;
use crate::models::{Account, RateTable, SubAccount, TransactionType};
use crate::rpc::messages::{ListAccountsRequest, ListTransactionsRequest, UserRequest};

const LISTING_PAGE_SIZE: u32 = 100;
const CASH_FLOW_PAGE_SIZE: u32 = 500;
const CASH_FLOW_MAX_PAGES: u32 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedSubAccount {
    #[serde(flatten)]
    pub sub_account: SubAccount,
    pub balance_in_account_currency: f64,
    pub balance_in_base_currency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedAccount {
    pub id: Uuid,
    pub name: String,
    pub account_type: String,
    pub currency: String,
    pub total_balance: f64,
    pub converted_total_balance: f64,
    pub is_mixed_currency: bool,
    pub sub_accounts: Vec<NormalizedSubAccount>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountsView {
    pub base_currency: String,
    pub accounts: Vec<NormalizedAccount>,
    pub total: u64,
    pub rates: HashMap<String, f64>,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetWorthView {
    pub base_currency: String,
    /// `None` when no balance could be converted.
    pub total: Option<f64>,
    pub by_currency: HashMap<String, f64>,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashFlowView {
    pub base_currency: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub income: f64,
    pub expense: f64,
    pub net: f64,
    pub by_category: BTreeMap<String, f64>,
    pub transaction_count: usize,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Converts with a rate table, recording currencies it has no leg for. Missing
/// legs leave the amount unconverted.
struct Converter<'a> {
    table: &'a RateTable,
    missing: BTreeSet<String>,
}

impl<'a> Converter<'a> {
    fn new(table: &'a RateTable) -> Self {
        Self {
            table,
            missing: BTreeSet::new(),
        }
    }

    fn convert(&mut self, amount: f64, from: &str, to: &str) -> f64 {
        match self.table.convert(amount, from, to) {
            Some(v) => v,
            None => {
                for code in [from, to] {
                    if self.table.rate(code).is_none() {
                        self.missing.insert(code.to_string());
                    }
                }
                amount
            }
        }
    }

    fn try_convert(&mut self, amount: f64, from: &str, to: &str) -> Option<f64> {
        let converted = self.table.convert(amount, from, to);
        if converted.is_none() {
            self.missing.insert(from.to_string());
        }
        converted
    }

    fn warnings(&self) -> Vec<String> {
        self.missing
            .iter()
            .map(|code| format!("No exchange rate for {}; amounts left unconverted", code))
            .collect()
    }
}

async fn within<F: Future>(deadline: Duration, fut: F) -> Result<F::Output, AppError> {
    tokio::time::timeout(deadline, fut).await.map_err(|_| {
        warn!("Fan-out exceeded its {:?} deadline", deadline);
        AppError::ServiceUnavailable("Service temporarily unavailable".to_string())
    })
}

/// Falls back to an identity table for `base` when rates are unavailable.
fn rates_or_identity<E: std::fmt::Display>(base: &str, rates: Result<RateTable, E>, warnings: &mut Vec<String>) -> RateTable {
    match rates {
        Ok(table) => table,
        Err(e) => {
            warn!("Exchange rates for {} unavailable: {}", base, e);
            warnings.push(format!("Exchange rates unavailable; balances are not converted to {}", base));
            RateTable::identity(base)
        }
    }
}

fn normalize_account(account: Account, base: &str, fx: &mut Converter<'_>) -> NormalizedAccount {
    let mut converted_total = 0.0;
    let mut is_mixed_currency = false;
    let sub_accounts = account
        .sub_accounts
        .into_iter()
        .map(|sub| {
            if sub.currency != account.currency {
                is_mixed_currency = true;
            }
            let in_account = fx.convert(sub.balance, &sub.currency, &account.currency);
            let in_base = fx.convert(sub.balance, &sub.currency, base);
            converted_total += in_base;
            NormalizedSubAccount {
                sub_account: sub,
                balance_in_account_currency: in_account,
                balance_in_base_currency: in_base,
            }
        })
        .collect();

    NormalizedAccount {
        id: account.id,
        name: account.name,
        account_type: account.account_type,
        currency: account.currency,
        total_balance: account.total_balance,
        converted_total_balance: converted_total,
        is_mixed_currency,
        sub_accounts,
        created_at: account.created_at,
        updated_at: account.updated_at,
    }
}

/// The user's accounts with every balance expressed in its account's currency
/// and in `base`.
pub async fn normalized_accounts(
    accounts: &dyn AccountsApi,
    fx: &dyn FxApi,
    ctx: &CallContext,
    user_id: Uuid,
    base: &str,
    deadline: Duration,
) -> Result<AccountsView, AppError> {
    let list = ListAccountsRequest {
        user_id,
        page: 1,
        page_size: LISTING_PAGE_SIZE,
    };
    let (listed, rates) = within(deadline, async {
        tokio::join!(accounts.list_accounts(ctx, list), fx.get_rates(ctx, base))
    })
    .await?;
    let listed = listed?;

    let mut warnings = Vec::new();
    let table = rates_or_identity(base, rates, &mut warnings);
    let mut converter = Converter::new(&table);
    let normalized = listed
        .accounts
        .into_iter()
        .map(|account| normalize_account(account, base, &mut converter))
        .collect();
    warnings.extend(converter.warnings());

    Ok(AccountsView {
        base_currency: base.to_string(),
        accounts: normalized,
        total: listed.total,
        rates: table.rates.clone(),
        warnings,
    })
}

/// Per-currency sums from the ledger folded into one total in `base`.
pub async fn net_worth(
    accounts: &dyn AccountsApi,
    fx: &dyn FxApi,
    ctx: &CallContext,
    user_id: Uuid,
    base: &str,
    deadline: Duration,
) -> Result<NetWorthView, AppError> {
    let (balances, rates) = within(deadline, async {
        tokio::join!(accounts.net_worth(ctx, UserRequest { user_id }), fx.get_rates(ctx, base))
    })
    .await?;
    let balances = balances?.balances;

    let mut warnings = Vec::new();
    let table = rates_or_identity(base, rates, &mut warnings);
    let mut converter = Converter::new(&table);

    let mut total = None;
    for (currency, amount) in &balances {
        if let Some(v) = converter.try_convert(*amount, currency, base) {
            *total.get_or_insert(0.0) += v;
        }
    }
    for code in &converter.missing {
        warnings.push(format!("No exchange rate for {}; excluded from total", code));
    }

    Ok(NetWorthView {
        base_currency: base.to_string(),
        total: total.or(if balances.is_empty() { Some(0.0) } else { None }),
        by_currency: balances,
        warnings,
    })
}

/// Income, expense and per-category totals in `base`. Transfers move money
/// between the user's own accounts and are left out.
#[allow(clippy::too_many_arguments)]
pub async fn cash_flow(
    transactions: &dyn TransactionsApi,
    fx: &dyn FxApi,
    ctx: &CallContext,
    user_id: Uuid,
    base: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    deadline: Duration,
) -> Result<CashFlowView, AppError> {
    let fetch_all = async {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let req = ListTransactionsRequest {
                user_id,
                from,
                to,
                transaction_type: None,
                sub_account_id: None,
                page,
                page_size: CASH_FLOW_PAGE_SIZE,
            };
            let resp = transactions.list_transactions(ctx, req).await?;
            let fetched = resp.transactions.len();
            all.extend(resp.transactions);
            if fetched == 0 || all.len() as u64 >= resp.total || page >= CASH_FLOW_MAX_PAGES {
                return Ok::<_, AppError>((all, resp.total));
            }
            page += 1;
        }
    };
    let (listed, rates) = within(deadline, async { tokio::join!(fetch_all, fx.get_rates(ctx, base)) }).await?;
    let (listed, total) = listed?;

    let mut warnings = Vec::new();
    if (listed.len() as u64) < total {
        warnings.push(format!("Only the newest {} of {} transactions were included", listed.len(), total));
    }
    let table = rates_or_identity(base, rates, &mut warnings);
    let mut converter = Converter::new(&table);

    let mut income = 0.0;
    let mut expense = 0.0;
    let mut by_category: BTreeMap<String, f64> = BTreeMap::new();
    let mut counted = 0;
    for tx in &listed {
        let kind = match tx.kind() {
            Some(TransactionType::Transfer) | None => continue,
            Some(kind) => kind,
        };
        let amount = converter.convert(tx.amount.abs(), &tx.currency, base);
        match kind {
            TransactionType::Income => income += amount,
            TransactionType::Expense => expense += amount,
            TransactionType::Transfer => {}
        }
        let signed = if kind == TransactionType::Expense { -amount } else { amount };
        *by_category.entry(tx.display_category().to_string()).or_default() += signed;
        counted += 1;
    }
    warnings.extend(converter.warnings());

    Ok(CashFlowView {
        base_currency: base.to_string(),
        from,
        to,
        income,
        expense,
        net: income - expense,
        by_category,
        transaction_count: counted,
        warnings,
    })
}
