use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use std::collections::HashMap;
use uuid::Uuid;

use super::ledger::{account_total, LedgerError};
use crate::database::{DatabasePool, StoreError};
use crate::fx::CurrencyConverter;
use crate::models::{Account, BalanceHistory, SubAccount};

const ACCOUNT_COLUMNS: &str = "id, user_id, name, account_type, currency, total_balance, created_at, updated_at";
const SUB_ACCOUNT_COLUMNS: &str =
    "id, account_id, user_id, name, asset_class, currency, balance, symbol, quantity, created_at, updated_at";

/// One sub-account mutation, persisted together with the parent's new total.
#[derive(Debug, Clone)]
pub enum SubAccountChange {
    Create(SubAccount),
    Update(SubAccount),
    Delete {
        id: Uuid,
        account_id: Uuid,
        at: DateTime<Utc>,
    },
}

impl SubAccountChange {
    pub fn account_id(&self) -> Uuid {
        match self {
            SubAccountChange::Create(sub) | SubAccountChange::Update(sub) => sub.account_id,
            SubAccountChange::Delete { account_id, .. } => *account_id,
        }
    }
}

/// Soft-deleted rows are invisible to every read.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// A page of the user's accounts with their sub-accounts, plus the total count.
    async fn list_accounts(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<(Vec<Account>, u64), StoreError>;

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn create_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Marks the account and all of its sub-accounts deleted.
    async fn soft_delete_account(&self, account_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn get_sub_account(&self, sub_account_id: Uuid) -> Result<Option<SubAccount>, StoreError>;

    /// Applies the change and appends history, atomically. The parent is
    /// locked for the duration and its total is re-derived through `fx` from
    /// the live sub-accounts. Returns the new total.
    async fn apply_sub_account_change(
        &self,
        change: &SubAccountChange,
        history: Option<&BalanceHistory>,
        fx: &dyn CurrencyConverter,
    ) -> Result<f64, LedgerError>;

    /// Ids of accounts holding at least one sub-account in another currency.
    async fn mixed_currency_accounts(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Re-derives one account's total under the same lock as
    /// `apply_sub_account_change`. `None` when the account is gone.
    async fn recalculate_total(&self, account_id: Uuid, fx: &dyn CurrencyConverter) -> Result<Option<f64>, LedgerError>;

    /// Live sub-account balances summed per native currency.
    async fn balances_by_currency(&self, user_id: Uuid) -> Result<HashMap<String, f64>, StoreError>;
}

#[derive(Clone)]
pub struct PgAccountStore {
    pool: DatabasePool,
}

impl PgAccountStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn attach_sub_accounts(&self, accounts: &mut [Account]) -> Result<(), StoreError> {
        if accounts.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = accounts.iter().map(|a| a.id).collect();
        let sql = format!(
            "SELECT {} FROM sub_accounts WHERE account_id = ANY($1) AND deleted_at IS NULL ORDER BY created_at",
            SUB_ACCOUNT_COLUMNS
        );
        let subs = sqlx::query_as::<_, SubAccount>(&sql)
            .bind(&ids)
            .fetch_all(&*self.pool)
            .await?;

        let mut by_account: HashMap<Uuid, Vec<SubAccount>> = HashMap::new();
        for sub in subs {
            by_account.entry(sub.account_id).or_default().push(sub);
        }
        for account in accounts.iter_mut() {
            account.sub_accounts = by_account.remove(&account.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn list_accounts(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<(Vec<Account>, u64), StoreError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE user_id = $1 AND deleted_at IS NULL")
                .bind(user_id)
                .fetch_one(&*self.pool)
                .await?;

        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let sql = format!(
            "SELECT {} FROM accounts WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at LIMIT $2 OFFSET $3",
            ACCOUNT_COLUMNS
        );
        let mut accounts = sqlx::query_as::<_, Account>(&sql)
            .bind(user_id)
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&*self.pool)
            .await?;
        self.attach_sub_accounts(&mut accounts).await?;

        Ok((accounts, total.max(0) as u64))
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 AND deleted_at IS NULL",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(account_id)
            .fetch_optional(&*self.pool)
            .await?;

        match account {
            Some(account) => {
                let mut one = [account];
                self.attach_sub_accounts(&mut one).await?;
                let [account] = one;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO accounts (id, user_id, name, account_type, currency, total_balance, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(&account.name)
        .bind(&account.account_type)
        .bind(&account.currency)
        .bind(account.total_balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(StoreError::from_write)?;
        Ok(())
    }

    async fn soft_delete_account(&self, account_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE sub_accounts SET deleted_at = $2, updated_at = $2 WHERE account_id = $1 AND deleted_at IS NULL")
            .bind(account_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("UPDATE accounts SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL")
            .bind(account_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_sub_account(&self, sub_account_id: Uuid) -> Result<Option<SubAccount>, StoreError> {
        let sql = format!(
            "SELECT {} FROM sub_accounts WHERE id = $1 AND deleted_at IS NULL",
            SUB_ACCOUNT_COLUMNS
        );
        Ok(sqlx::query_as::<_, SubAccount>(&sql)
            .bind(sub_account_id)
            .fetch_optional(&*self.pool)
            .await?)
    }

    async fn apply_sub_account_change(
        &self,
        change: &SubAccountChange,
        history: Option<&BalanceHistory>,
        fx: &dyn CurrencyConverter,
    ) -> Result<f64, LedgerError> {
        let account_id = change.account_id();
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let currency = lock_account(&mut tx, account_id).await?.ok_or(StoreError::NotFound)?;
        write_change(&mut tx, change).await?;
        let members = live_sub_accounts(&mut tx, account_id).await?;
        let total = account_total(fx, &currency, &members).await?;
        write_total(&mut tx, account_id, total).await?;
        if let Some(h) = history {
            write_history(&mut tx, h).await?;
        }

        tx.commit().await.map_err(StoreError::from)?;
        Ok(total)
    }

    async fn mixed_currency_accounts(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT a.id FROM accounts a WHERE a.deleted_at IS NULL AND EXISTS (\
             SELECT 1 FROM sub_accounts s WHERE s.account_id = a.id \
             AND s.deleted_at IS NULL AND s.currency <> a.currency)",
        )
        .fetch_all(&*self.pool)
        .await?)
    }

    async fn recalculate_total(&self, account_id: Uuid, fx: &dyn CurrencyConverter) -> Result<Option<f64>, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let Some(currency) = lock_account(&mut tx, account_id).await? else {
            return Ok(None);
        };
        let members = live_sub_accounts(&mut tx, account_id).await?;
        let total = account_total(fx, &currency, &members).await?;
        write_total(&mut tx, account_id, total).await?;
        tx.commit().await.map_err(StoreError::from)?;
        Ok(Some(total))
    }

    async fn balances_by_currency(&self, user_id: Uuid) -> Result<HashMap<String, f64>, StoreError> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT s.currency, COALESCE(SUM(s.balance), 0) FROM sub_accounts s \
             JOIN accounts a ON a.id = s.account_id \
             WHERE s.user_id = $1 AND s.deleted_at IS NULL AND a.deleted_at IS NULL \
             GROUP BY s.currency",
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}

/// Row-locks a live account until the transaction ends and returns its currency.
async fn lock_account(conn: &mut PgConnection, account_id: Uuid) -> Result<Option<String>, StoreError> {
    Ok(
        sqlx::query_scalar("SELECT currency FROM accounts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

async fn live_sub_accounts(conn: &mut PgConnection, account_id: Uuid) -> Result<Vec<SubAccount>, StoreError> {
    let sql = format!(
        "SELECT {} FROM sub_accounts WHERE account_id = $1 AND deleted_at IS NULL ORDER BY created_at",
        SUB_ACCOUNT_COLUMNS
    );
    Ok(sqlx::query_as::<_, SubAccount>(&sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?)
}

async fn write_change(conn: &mut PgConnection, change: &SubAccountChange) -> Result<(), StoreError> {
    let result = match change {
        SubAccountChange::Create(sub) => {
            sqlx::query(
                "INSERT INTO sub_accounts (id, account_id, user_id, name, asset_class, currency, balance, \
                 symbol, quantity, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(sub.id)
            .bind(sub.account_id)
            .bind(sub.user_id)
            .bind(&sub.name)
            .bind(&sub.asset_class)
            .bind(&sub.currency)
            .bind(sub.balance)
            .bind(&sub.symbol)
            .bind(sub.quantity)
            .bind(sub.created_at)
            .bind(sub.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(StoreError::from_write)?
        }
        SubAccountChange::Update(sub) => {
            sqlx::query(
                "UPDATE sub_accounts SET name = $2, balance = $3, symbol = $4, quantity = $5, updated_at = $6 \
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(sub.id)
            .bind(&sub.name)
            .bind(sub.balance)
            .bind(&sub.symbol)
            .bind(sub.quantity)
            .bind(sub.updated_at)
            .execute(&mut *conn)
            .await?
        }
        SubAccountChange::Delete { id, at, .. } => {
            sqlx::query("UPDATE sub_accounts SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(at)
                .execute(&mut *conn)
                .await?
        }
    };
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

async fn write_total(conn: &mut PgConnection, account_id: Uuid, total: f64) -> Result<(), StoreError> {
    sqlx::query("UPDATE accounts SET total_balance = $2, updated_at = NOW() WHERE id = $1")
        .bind(account_id)
        .bind(total)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn write_history(conn: &mut PgConnection, h: &BalanceHistory) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO balance_history (id, sub_account_id, user_id, balance, date, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(h.id)
    .bind(h.sub_account_id)
    .bind(h.user_id)
    .bind(h.balance)
    .bind(h.date)
    .bind(h.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
