//! Performance metrics module.
//!
//! Provides performance calculations over a strategy's daily NAV:
//! - Total return
//! - Maximum drawdown
//! - Sharpe ratio, Sortino ratio
//! - Option assignment statistics

pub mod calculator;

pub use calculator::{DrawdownAnalysis, MetricsCalculator, PerformanceMetrics};
