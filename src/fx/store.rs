use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::database::{DatabasePool, StoreError};
use crate::models::RateTable;

#[async_trait]
pub trait RateStore: Send + Sync {
    /// All `base → X` rows as a table, or `None` when nothing is stored.
    async fn load_rates(&self, base: &str) -> Result<Option<RateTable>, StoreError>;

    async fn direct_rate(&self, from: &str, to: &str) -> Result<Option<f64>, StoreError>;

    /// Upserts every row and the day's history point in one transaction.
    async fn save_rates(&self, table: &RateTable) -> Result<usize, StoreError>;
}

#[derive(Clone)]
pub struct PgRateStore {
    pool: DatabasePool,
}

impl PgRateStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn load_rates(&self, base: &str) -> Result<Option<RateTable>, StoreError> {
        let rows: Vec<(String, f64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT to_currency, rate, updated_at FROM exchange_rates WHERE from_currency = $1",
        )
        .bind(base)
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        let updated_at = rows.iter().map(|(_, _, at)| *at).min().unwrap_or_else(Utc::now);
        let rates: HashMap<String, f64> = rows.into_iter().map(|(to, rate, _)| (to, rate)).collect();
        Ok(Some(RateTable::new(base, rates, updated_at)))
    }

    async fn direct_rate(&self, from: &str, to: &str) -> Result<Option<f64>, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT rate FROM exchange_rates WHERE from_currency = $1 AND to_currency = $2",
        )
        .bind(from)
        .bind(to)
        .fetch_optional(&*self.pool)
        .await?)
    }

    async fn save_rates(&self, table: &RateTable) -> Result<usize, StoreError> {
        let date = table.updated_at.date_naive();
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for (to, rate) in &table.rates {
            if to == &table.base {
                continue;
            }
            sqlx::query(
                "INSERT INTO exchange_rates (from_currency, to_currency, rate, updated_at) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (from_currency, to_currency) DO UPDATE SET \
                 rate = EXCLUDED.rate, updated_at = EXCLUDED.updated_at",
            )
            .bind(&table.base)
            .bind(to)
            .bind(rate)
            .bind(table.updated_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO rate_history (from_currency, to_currency, date, rate) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (from_currency, to_currency, date) DO UPDATE SET rate = EXCLUDED.rate",
            )
            .bind(&table.base)
            .bind(to)
            .bind(date)
            .bind(rate)
            .execute(&mut *tx)
            .await?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }
}
