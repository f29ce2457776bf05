//! Monte Carlo simulation of leveraged ETF price distributions.

pub mod leveraged;

pub use leveraged::{
    annualized_volatility, simulate_leveraged_prices, simulate_with_progress, SimulationConfig,
    SimulationError, SimulationResult, TRADING_DAYS_PER_YEAR,
};
