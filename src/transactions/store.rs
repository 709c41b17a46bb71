use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::{DatabasePool, StoreError};
use crate::models::{Transaction, TransactionType};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub transaction_type: Option<TransactionType>,
    pub sub_account_id: Option<Uuid>,
}

impl TransactionFilter {
    /// Parses the loosely typed request fields.
    pub fn parse(
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        transaction_type: Option<&str>,
        sub_account_id: Option<Uuid>,
    ) -> Result<Self, String> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err("from must not be after to".to_string());
            }
        }
        let transaction_type = match transaction_type.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => Some(TransactionType::from_str(t).ok_or_else(|| format!("unknown transaction type: {}", t))?),
            None => None,
        };
        Ok(Self {
            from,
            to,
            transaction_type,
            sub_account_id,
        })
    }

    fn push_conditions<'a>(&'a self, qb: &mut QueryBuilder<'a, Postgres>) {
        if let Some(from) = self.from {
            qb.push(" AND date >= ");
            qb.push_bind(from);
        }
        if let Some(to) = self.to {
            qb.push(" AND date <= ");
            qb.push_bind(to);
        }
        if let Some(kind) = self.transaction_type {
            qb.push(" AND transaction_type = ");
            qb.push_bind(kind.as_str());
        }
        if let Some(sub_account_id) = self.sub_account_id {
            qb.push(" AND (sub_account_id = ");
            qb.push_bind(sub_account_id);
            qb.push(" OR to_sub_account_id = ");
            qb.push_bind(sub_account_id);
            qb.push(")");
        }
    }
}

pub fn normalize_page(page: u32, page_size: u32) -> (u32, u32) {
    let page = page.max(1);
    let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size.min(MAX_PAGE_SIZE) };
    (page, page_size)
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Newest first. Returns the page and the total number of matches.
    async fn list(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Transaction>, u64), StoreError>;
}

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: DatabasePool,
}

impl PgTransactionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn list(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let mut count: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM transactions WHERE deleted_at IS NULL AND user_id = ");
        count.push_bind(user_id);
        filter.push_conditions(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(&*self.pool).await?;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, user_id, sub_account_id, amount, currency, transaction_type, category, custom_category, \
             description, date, to_sub_account_id, created_at, updated_at \
             FROM transactions WHERE deleted_at IS NULL AND user_id = ",
        );
        qb.push_bind(user_id);
        filter.push_conditions(&mut qb);
        qb.push(" ORDER BY date DESC, created_at DESC LIMIT ");
        qb.push_bind(page_size as i64);
        qb.push(" OFFSET ");
        qb.push_bind((page.saturating_sub(1) as i64) * page_size as i64);

        let transactions = qb.build_query_as::<Transaction>().fetch_all(&*self.pool).await?;
        Ok((transactions, total.max(0) as u64))
    }
}
