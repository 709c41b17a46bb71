use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An investment position. The derived fields are only valid after
/// [`Asset::calculate_profit_loss`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sub_account_id: Option<Uuid>,
    pub symbol: String,
    pub name: Option<String>,
    pub asset_class: String,
    pub quantity: f64,
    pub purchase_price: f64,
    pub current_price: f64,
    pub currency: String,
    pub total_value: f64,
    pub profit_loss: f64,
    pub profit_loss_percent: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn calculate_profit_loss(&mut self) {
        let cost_basis = self.quantity * self.purchase_price;
        self.total_value = self.quantity * self.current_price;
        self.profit_loss = self.total_value - cost_basis;
        self.profit_loss_percent = if cost_basis > 0.0 {
            self.profit_loss / cost_basis * 100.0
        } else {
            0.0
        };
    }

    pub fn apply_price(&mut self, price: f64, at: DateTime<Utc>) {
        self.current_price = price;
        self.updated_at = at;
        self.calculate_profit_loss();
    }
}
