use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `rates[X]` is how many units of `X` one unit of `base` buys. `rates[base]` is always 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    pub base: String,
    pub rates: HashMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

impl RateTable {
    pub fn new(base: &str, mut rates: HashMap<String, f64>, updated_at: DateTime<Utc>) -> Self {
        let base = base.to_uppercase();
        rates.insert(base.clone(), 1.0);
        Self {
            base,
            rates,
            updated_at,
        }
    }

    /// A table that only knows its own base.
    pub fn identity(base: &str) -> Self {
        Self::new(base, HashMap::new(), Utc::now())
    }

    pub fn rate(&self, currency: &str) -> Option<f64> {
        self.rates.get(currency).copied().filter(|r| r.is_finite() && *r > 0.0)
    }

    /// Derives `from → to` through the base: `rate(to) / rate(from)`.
    pub fn cross_rate(&self, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }
        Some(self.rate(to)? / self.rate(from)?)
    }

    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        self.cross_rate(from, to).map(|r| amount * r)
    }

    /// Re-expresses the table relative to another currency it contains.
    pub fn rebase(&self, new_base: &str) -> Option<RateTable> {
        let pivot = self.rate(new_base)?;
        let rates = self
            .rates
            .iter()
            .map(|(code, rate)| (code.clone(), rate / pivot))
            .collect();
        Some(RateTable::new(new_base, rates, self.updated_at))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub amount: f64,
    pub from: String,
    pub to: String,
    pub rate: f64,
    pub converted: f64,
}
