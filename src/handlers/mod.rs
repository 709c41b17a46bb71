pub mod accounts;
pub mod auth;
pub mod fx;
pub mod health;
pub mod prices;
pub mod transactions;
