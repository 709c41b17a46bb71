use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::store::{AccountStore, SubAccountChange};
use crate::database::StoreError;
use crate::fx::{CurrencyConverter, FxError, RatesListener};
use crate::models::{Account, AccountType, AssetClass, BalanceHistory, Currency, RateTable, SubAccount};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{0}")]
    InvalidInput(String),
    /// Also returned for resources owned by someone else.
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("exchange rate unavailable: {0}")]
    Fx(#[from] FxError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct NewSubAccount {
    pub account_id: Uuid,
    pub name: String,
    pub asset_class: String,
    pub currency: Option<String>,
    pub balance: f64,
    pub symbol: Option<String>,
    pub quantity: Option<f64>,
}

/// `None` leaves a field untouched; `Some(0.0)` sets zero.
#[derive(Debug, Clone, Default)]
pub struct SubAccountPatch {
    pub name: Option<String>,
    pub balance: Option<f64>,
    pub quantity: Option<f64>,
    pub symbol: Option<String>,
}

/// Accounts and sub-accounts. Every sub-account mutation recomputes the
/// parent's `total_balance` in the parent's currency, inside the store's
/// write so concurrent mutations on one account cannot drop each other.
pub struct AccountLedger {
    store: Arc<dyn AccountStore>,
    fx: Arc<dyn CurrencyConverter>,
}

impl AccountLedger {
    pub fn new(store: Arc<dyn AccountStore>, fx: Arc<dyn CurrencyConverter>) -> Self {
        Self { store, fx }
    }

    pub async fn list_accounts(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<(Vec<Account>, u64, u32, u32), LedgerError> {
        let page = page.max(1);
        let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size.min(MAX_PAGE_SIZE) };
        let (accounts, total) = self.store.list_accounts(user_id, page, page_size).await?;
        Ok((accounts, total, page, page_size))
    }

    pub async fn create_account(
        &self,
        user_id: Uuid,
        name: &str,
        account_type: &str,
        currency: &str,
    ) -> Result<Account, LedgerError> {
        let name = validate_name(name)?;
        let account_type = AccountType::from_str(account_type)
            .ok_or_else(|| LedgerError::InvalidInput(format!("unknown account type: {}", account_type)))?;
        let currency = validate_currency(currency)?;

        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            user_id,
            name,
            account_type: account_type.as_str().to_string(),
            currency,
            total_balance: 0.0,
            created_at: now,
            updated_at: now,
            sub_accounts: Vec::new(),
        };
        self.store.create_account(&account).await?;
        info!("Created account {} for user {}", account.id, user_id);
        Ok(account)
    }

    pub async fn delete_account(&self, user_id: Uuid, account_id: Uuid) -> Result<(), LedgerError> {
        self.owned_account(user_id, account_id).await?;
        self.store.soft_delete_account(account_id, Utc::now()).await?;
        info!("Deleted account {}", account_id);
        Ok(())
    }

    pub async fn create_sub_account(&self, user_id: Uuid, input: NewSubAccount) -> Result<(SubAccount, f64), LedgerError> {
        let account = self.owned_account(user_id, input.account_id).await?;
        let name = validate_name(&input.name)?;
        let asset_class = AssetClass::from_str(&input.asset_class)
            .ok_or_else(|| LedgerError::InvalidInput(format!("unknown asset class: {}", input.asset_class)))?;
        let currency = match input.currency.as_deref() {
            Some(code) => validate_currency(code)?,
            None => account.currency.clone(),
        };
        validate_amount("balance", input.balance)?;
        if let Some(q) = input.quantity {
            validate_quantity(q)?;
        }

        let now = Utc::now();
        let sub = SubAccount {
            id: Uuid::new_v4(),
            account_id: account.id,
            user_id,
            name,
            asset_class: asset_class.as_str().to_string(),
            currency,
            balance: input.balance,
            symbol: input.symbol.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()),
            quantity: input.quantity,
            created_at: now,
            updated_at: now,
        };

        let history = (sub.balance > 0.0).then(|| BalanceHistory::record(&sub, now));
        let total = self
            .store
            .apply_sub_account_change(&SubAccountChange::Create(sub.clone()), history.as_ref(), self.fx.as_ref())
            .await?;
        Ok((sub, total))
    }

    pub async fn update_sub_account(
        &self,
        user_id: Uuid,
        sub_account_id: Uuid,
        patch: SubAccountPatch,
    ) -> Result<(SubAccount, f64), LedgerError> {
        let mut sub = self.owned_sub_account(user_id, sub_account_id).await?;

        if let Some(name) = patch.name.as_deref() {
            sub.name = validate_name(name)?;
        }
        if let Some(q) = patch.quantity {
            validate_quantity(q)?;
            sub.quantity = Some(q);
        }
        if let Some(symbol) = patch.symbol {
            let symbol = symbol.trim().to_uppercase();
            sub.symbol = (!symbol.is_empty()).then_some(symbol);
        }
        let mut balance_changed = false;
        if let Some(balance) = patch.balance {
            validate_amount("balance", balance)?;
            balance_changed = balance != sub.balance;
            sub.balance = balance;
        }

        let now = Utc::now();
        sub.updated_at = now;

        let history = balance_changed.then(|| BalanceHistory::record(&sub, now));
        let total = self
            .store
            .apply_sub_account_change(&SubAccountChange::Update(sub.clone()), history.as_ref(), self.fx.as_ref())
            .await?;
        Ok((sub, total))
    }

    /// Returns the parent's new total.
    pub async fn delete_sub_account(&self, user_id: Uuid, sub_account_id: Uuid) -> Result<f64, LedgerError> {
        let sub = self.owned_sub_account(user_id, sub_account_id).await?;
        let change = SubAccountChange::Delete {
            id: sub.id,
            account_id: sub.account_id,
            at: Utc::now(),
        };
        Ok(self.store.apply_sub_account_change(&change, None, self.fx.as_ref()).await?)
    }

    /// Per-currency sums only; converting them into one figure is left to the caller.
    pub async fn net_worth_by_currency(&self, user_id: Uuid) -> Result<HashMap<String, f64>, LedgerError> {
        Ok(self.store.balances_by_currency(user_id).await?)
    }

    /// Re-derives totals of mixed-currency accounts at current rates.
    /// Accounts whose rates are missing keep their previous total.
    pub async fn recalculate_mixed_totals(&self) -> Result<usize, LedgerError> {
        let ids = self.store.mixed_currency_accounts().await?;
        let mut updated = 0;
        for id in ids {
            match self.store.recalculate_total(id, self.fx.as_ref()).await {
                Ok(Some(_)) => updated += 1,
                Ok(None) => {}
                Err(e) => warn!("Keeping stale total for account {}: {}", id, e),
            }
        }
        Ok(updated)
    }

    async fn owned_account(&self, user_id: Uuid, account_id: Uuid) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or(LedgerError::NotFound("account"))
    }

    async fn owned_sub_account(&self, user_id: Uuid, sub_account_id: Uuid) -> Result<SubAccount, LedgerError> {
        let sub = self
            .store
            .get_sub_account(sub_account_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or(LedgerError::NotFound("sub-account"))?;
        self.owned_account(user_id, sub.account_id).await?;
        Ok(sub)
    }
}

/// Sum of `members` in `currency`, one rate lookup per distinct currency.
pub async fn account_total(fx: &dyn CurrencyConverter, currency: &str, members: &[SubAccount]) -> Result<f64, FxError> {
    let mut rates: HashMap<&str, f64> = HashMap::new();
    let mut total = 0.0;
    for sub in members {
        let rate = match rates.get(sub.currency.as_str()) {
            Some(rate) => *rate,
            None => {
                let rate = fx.rate(&sub.currency, currency).await?;
                rates.insert(sub.currency.as_str(), rate);
                rate
            }
        };
        total += sub.balance * rate;
    }
    Ok(total)
}

#[async_trait]
impl RatesListener for AccountLedger {
    async fn rates_refreshed(&self, table: &RateTable) {
        match self.recalculate_mixed_totals().await {
            Ok(n) => info!("Recalculated {} mixed-currency account totals after {} refresh", n, table.base),
            Err(e) => warn!("Mixed-currency recalculation failed: {}", e),
        }
    }
}

fn validate_name(name: &str) -> Result<String, LedgerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidInput("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(LedgerError::InvalidInput(format!("name must be at most {} characters", MAX_NAME_LEN)));
    }
    Ok(name.to_string())
}

fn validate_currency(code: &str) -> Result<String, LedgerError> {
    Currency::from_str(code)
        .map(Currency::into_string)
        .ok_or_else(|| LedgerError::InvalidInput(format!("invalid currency code: {}", code)))
}

fn validate_amount(field: &str, value: f64) -> Result<(), LedgerError> {
    if !value.is_finite() {
        return Err(LedgerError::InvalidInput(format!("{} must be a finite number", field)));
    }
    Ok(())
}

fn validate_quantity(value: f64) -> Result<(), LedgerError> {
    validate_amount("quantity", value)?;
    if value < 0.0 {
        return Err(LedgerError::InvalidInput("quantity must not be negative".to_string()));
    }
    Ok(())
}
