pub mod ledger;
pub mod store;

pub use ledger::{account_total, AccountLedger, LedgerError, NewSubAccount, SubAccountPatch};
pub use store::{AccountStore, PgAccountStore, SubAccountChange};
