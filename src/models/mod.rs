//! Shared types. Use date types (chrono) for timestamps and dates.

pub mod account;
pub mod asset;
pub mod currency;
pub mod fx;
pub mod price;
pub mod transaction;
pub mod user;

pub use account::{Account, AccountType, AssetClass, BalanceHistory, SubAccount};
pub use asset::Asset;
pub use currency::{Currency, DEFAULT_CURRENCY};
pub use fx::{Conversion, RateTable};
pub use price::{BatchPrices, HistoryPoint, PriceData, RefreshOutcome, SearchResult};
pub use transaction::{Transaction, TransactionType};
pub use user::{NewUser, PublicUser, User};
