//! Backtesting engine for option-selling strategies.
//!
//! This module provides:
//! - Orders, trades and instruments
//! - The strategy book (cash, positions, trade records, NAV history)
//! - Wheel, covered call, sell put and hold-stock strategies
//! - Commission tracking
//! - The tick replay loop with fills, assignment and expiration

pub mod book;
pub mod commission;
pub mod engine;
pub mod journal;
pub mod order;
pub mod strategy;

pub use book::{BacktestError, History, StrategyBook};
pub use commission::CommissionModel;
pub use engine::{BacktestConfig, BacktestEngine, BacktestResult};
pub use journal::Journal;
pub use order::{Instrument, Order, Trade};
pub use strategy::{compute_strike, Strategy, StrategyConfig, StrategyKind};
