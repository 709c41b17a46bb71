pub mod portfolio;

pub use portfolio::{router as portfolio_router, PortfolioState};
