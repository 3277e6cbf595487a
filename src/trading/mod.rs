//! Trading layer: portfolio state, risk limits, and the paper executor

pub mod executor;
pub mod portfolio;
pub mod risk;

pub use executor::{Executor, TradeRecord};
pub use portfolio::{PortfolioStore, Position};
pub use risk::{BuyCheck, RiskLimits, RiskVerdict};
