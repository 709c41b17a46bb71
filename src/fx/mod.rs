pub mod manager;
pub mod store;

pub use manager::{rates_key, CurrencyConverter, FxError, FxManager, RatesListener};
pub use store::{PgRateStore, RateStore};
