pub mod clients;
pub mod fanout;

pub use clients::{
    AccountsApi, CallContext, DownstreamResult, FxApi, MarketApi, RpcPortfolioClient, TransactionsApi, ACCOUNT_SERVICE,
    FX_SERVICE, PRICE_SERVICE, TRANSACTION_SERVICE,
};
pub use fanout::{AccountsView, CashFlowView, NetWorthView, NormalizedAccount, NormalizedSubAccount};
