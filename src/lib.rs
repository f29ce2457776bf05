pub mod backtest;
pub mod chart;
pub mod config;
pub mod data;
pub mod metrics;
pub mod pricing;
pub mod simulation;

// Re-export commonly used types
pub use backtest::{BacktestConfig, BacktestEngine, BacktestResult, StrategyConfig, StrategyKind};
pub use config::Config;
pub use data::{MarketDataLoader, OptionContract, OptionQuote, OptionType, Side, StockBar};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
pub use pricing::{BlackScholes, Pricer};
pub use simulation::{simulate_leveraged_prices, SimulationConfig, SimulationResult};
