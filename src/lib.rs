//! FinTrack backend: the public HTTP gateway and the internal portfolio
//! service share this crate; each binary wires only what it serves.

pub mod accounts;
pub mod app;
pub mod auth;
pub mod background;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod fx;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod resilience;
pub mod response;
pub mod rpc;
pub mod services;
pub mod shutdown;
pub mod telemetry;
pub mod transactions;
pub mod utils;

pub use app::{build_router, AppState};
pub use config::Config;
