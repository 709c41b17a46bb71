pub mod manager;
pub mod store;

pub use manager::{cache_key, PriceError, PriceManager};
pub use store::{PgPriceStore, PriceStore};
