use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::database::{DatabasePool, StoreError};
use crate::models::{Asset, HistoryPoint, PriceData};

const ASSET_COLUMNS: &str = "id, user_id, sub_account_id, symbol, name, asset_class, quantity, purchase_price, \
     current_price, currency, total_value, profit_loss, profit_loss_percent, created_at, updated_at";

/// Durable price tier (`price_cache`, `price_history`) and the asset rows
/// that carry prices.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn get_cached(&self, symbol: &str, asset_class: &str) -> Result<Option<PriceData>, StoreError>;

    async fn upsert_prices(&self, prices: &[PriceData]) -> Result<(), StoreError>;

    async fn get_history(
        &self,
        symbol: &str,
        asset_class: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, StoreError>;

    async fn upsert_history(
        &self,
        symbol: &str,
        asset_class: &str,
        points: &[HistoryPoint],
    ) -> Result<(), StoreError>;

    /// Live assets of `user_id`, optionally restricted to `ids`.
    async fn user_assets(&self, user_id: Uuid, ids: Option<&[Uuid]>) -> Result<Vec<Asset>, StoreError>;

    /// Writes price and derived P/L of every asset in one transaction.
    async fn update_asset_prices(&self, assets: &[Asset]) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct PgPriceStore {
    pool: DatabasePool,
}

impl PgPriceStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceStore for PgPriceStore {
    async fn get_cached(&self, symbol: &str, asset_class: &str) -> Result<Option<PriceData>, StoreError> {
        Ok(sqlx::query_as::<_, PriceData>(
            "SELECT symbol, asset_class, price, currency, change_24h, change_percent_24h, high_24h, \
             low_24h, volume_24h, market_cap, source, updated_at \
             FROM price_cache WHERE symbol = $1 AND asset_class = $2",
        )
        .bind(symbol)
        .bind(asset_class)
        .fetch_optional(&*self.pool)
        .await?)
    }

    async fn upsert_prices(&self, prices: &[PriceData]) -> Result<(), StoreError> {
        if prices.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for p in prices {
            sqlx::query(
                "INSERT INTO price_cache (symbol, asset_class, price, currency, change_24h, \
                 change_percent_24h, high_24h, low_24h, volume_24h, market_cap, source, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (symbol, asset_class) DO UPDATE SET \
                 price = EXCLUDED.price, currency = EXCLUDED.currency, change_24h = EXCLUDED.change_24h, \
                 change_percent_24h = EXCLUDED.change_percent_24h, high_24h = EXCLUDED.high_24h, \
                 low_24h = EXCLUDED.low_24h, volume_24h = EXCLUDED.volume_24h, \
                 market_cap = EXCLUDED.market_cap, source = EXCLUDED.source, updated_at = EXCLUDED.updated_at",
            )
            .bind(&p.symbol)
            .bind(&p.asset_class)
            .bind(p.price)
            .bind(&p.currency)
            .bind(p.change_24h)
            .bind(p.change_percent_24h)
            .bind(p.high_24h)
            .bind(p.low_24h)
            .bind(p.volume_24h)
            .bind(p.market_cap)
            .bind(&p.source)
            .bind(p.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_history(
        &self,
        symbol: &str,
        asset_class: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, StoreError> {
        Ok(sqlx::query_as::<_, HistoryPoint>(
            "SELECT date, open, high, low, close, volume FROM price_history \
             WHERE symbol = $1 AND asset_class = $2 AND date BETWEEN $3 AND $4 ORDER BY date",
        )
        .bind(symbol)
        .bind(asset_class)
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await?)
    }

    async fn upsert_history(
        &self,
        symbol: &str,
        asset_class: &str,
        points: &[HistoryPoint],
    ) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for p in points {
            sqlx::query(
                "INSERT INTO price_history (symbol, asset_class, date, open, high, low, close, volume) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (symbol, asset_class, date) DO UPDATE SET \
                 open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                 close = EXCLUDED.close, volume = EXCLUDED.volume",
            )
            .bind(symbol)
            .bind(asset_class)
            .bind(p.date)
            .bind(p.open)
            .bind(p.high)
            .bind(p.low)
            .bind(p.close)
            .bind(p.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn user_assets(&self, user_id: Uuid, ids: Option<&[Uuid]>) -> Result<Vec<Asset>, StoreError> {
        let assets = match ids {
            Some(ids) => {
                let sql = format!(
                    "SELECT {} FROM assets WHERE user_id = $1 AND deleted_at IS NULL AND id = ANY($2)",
                    ASSET_COLUMNS
                );
                sqlx::query_as::<_, Asset>(&sql)
                    .bind(user_id)
                    .bind(ids)
                    .fetch_all(&*self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM assets WHERE user_id = $1 AND deleted_at IS NULL",
                    ASSET_COLUMNS
                );
                sqlx::query_as::<_, Asset>(&sql)
                    .bind(user_id)
                    .fetch_all(&*self.pool)
                    .await?
            }
        };
        Ok(assets)
    }

    async fn update_asset_prices(&self, assets: &[Asset]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for a in assets {
            let result = sqlx::query(
                "UPDATE assets SET current_price = $2, total_value = $3, profit_loss = $4, \
                 profit_loss_percent = $5, updated_at = $6 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(a.id)
            .bind(a.current_price)
            .bind(a.total_value)
            .bind(a.profit_loss)
            .bind(a.profit_loss_percent)
            .bind(a.updated_at)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }
}
