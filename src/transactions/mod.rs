pub mod store;

pub use store::{normalize_page, PgTransactionStore, TransactionFilter, TransactionStore};
