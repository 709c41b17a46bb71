use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "income" => Some(TransactionType::Income),
            "expense" => Some(TransactionType::Expense),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

pub const CATEGORIES: &[&str] = &[
    "salary",
    "freelance",
    "investment",
    "gift",
    "food",
    "transport",
    "housing",
    "utilities",
    "entertainment",
    "health",
    "education",
    "shopping",
    "travel",
    "subscriptions",
    "taxes",
    "transfer",
    "other",
];

pub fn is_known_category(category: &str) -> bool {
    CATEGORIES.contains(&category)
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sub_account_id: Option<Uuid>,
    /// Signed: expenses are usually negative, but only `transaction_type` is authoritative.
    pub amount: f64,
    pub currency: String,
    pub transaction_type: String,
    pub category: String,
    pub custom_category: Option<String>,
    pub description: Option<String>,
    #[serde(with = "crate::utils::date")]
    pub date: NaiveDate,
    pub to_sub_account_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn kind(&self) -> Option<TransactionType> {
        TransactionType::from_str(&self.transaction_type)
    }

    /// `custom_category` wins over the generic `other` bucket.
    pub fn display_category(&self) -> &str {
        match (&self.custom_category, self.category.as_str()) {
            (Some(custom), "other") if !custom.trim().is_empty() => custom.as_str(),
            (_, category) => category,
        }
    }
}
