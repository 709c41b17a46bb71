use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Bank,
    Cash,
    Investment,
    Crypto,
    RealEstate,
    Other,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Bank => "bank",
            AccountType::Cash => "cash",
            AccountType::Investment => "investment",
            AccountType::Crypto => "crypto",
            AccountType::RealEstate => "real_estate",
            AccountType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bank" => Some(AccountType::Bank),
            "cash" => Some(AccountType::Cash),
            "investment" => Some(AccountType::Investment),
            "crypto" => Some(AccountType::Crypto),
            "real_estate" => Some(AccountType::RealEstate),
            "other" => Some(AccountType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Bank,
    Cash,
    Stocks,
    Crypto,
    Etf,
    RealEstate,
    Bonds,
    Other,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Bank => "bank",
            AssetClass::Cash => "cash",
            AssetClass::Stocks => "stocks",
            AssetClass::Crypto => "crypto",
            AssetClass::Etf => "etf",
            AssetClass::RealEstate => "real_estate",
            AssetClass::Bonds => "bonds",
            AssetClass::Other => "other",
        }
    }

    /// Accepts `stock` as an alias of `stocks`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bank" => Some(AssetClass::Bank),
            "cash" => Some(AssetClass::Cash),
            "stock" | "stocks" => Some(AssetClass::Stocks),
            "crypto" => Some(AssetClass::Crypto),
            "etf" => Some(AssetClass::Etf),
            "real_estate" => Some(AssetClass::RealEstate),
            "bonds" => Some(AssetClass::Bonds),
            "other" => Some(AssetClass::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub account_type: String,
    pub currency: String,
    /// Sum of the live sub-accounts, converted into `currency`.
    pub total_balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub sub_accounts: Vec<SubAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubAccount {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub asset_class: String,
    pub currency: String,
    pub balance: f64,
    pub symbol: Option<String>,
    pub quantity: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BalanceHistory {
    pub id: Uuid,
    pub sub_account_id: Uuid,
    pub user_id: Uuid,
    pub balance: f64,
    #[serde(with = "crate::utils::date")]
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl BalanceHistory {
    pub fn record(sub: &SubAccount, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sub_account_id: sub.id,
            user_id: sub.user_id,
            balance: sub.balance,
            date: at.date_naive(),
            created_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_class_accepts_singular_stock() {
        assert_eq!(AssetClass::from_str("stock"), Some(AssetClass::Stocks));
        assert_eq!(AssetClass::from_str("STOCKS"), Some(AssetClass::Stocks));
        assert_eq!(AssetClass::from_str("commodities"), None);
    }

    #[test]
    fn account_type_round_trips_through_str() {
        for t in [
            AccountType::Bank,
            AccountType::Cash,
            AccountType::Investment,
            AccountType::Crypto,
            AccountType::RealEstate,
            AccountType::Other,
        ] {
            assert_eq!(AccountType::from_str(t.as_str()), Some(t));
        }
    }
}
