//! Core backtesting engine.
//!
//! Replays merged market ticks through one strategy:
//! 1. Feed the bar's open to the pricer and the strategy
//! 2. Fill pending orders (options at market, stock at its limit)
//! 3. Feed the full option chain to the pricer
//! 4. At the close, assign or expire options due today and record NAV

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::{MarketDataLoader, StockBar};
use crate::metrics::{MetricsCalculator, PerformanceMetrics};
use crate::pricing::Pricer;

use super::book::{BacktestError, History, StrategyBook};
use super::commission::CommissionModel;
use super::journal::Journal;
use super::order::Trade;
use super::strategy::{Strategy, StrategyConfig};

/// Configuration shared by every strategy in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Risk-free rate for theoretical option prices.
    pub interest_rate: f64,

    /// Commission model.
    pub commission: CommissionModel,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            interest_rate: 0.04,
            commission: CommissionModel::default(),
        }
    }
}

/// Result of one strategy's backtest.
#[derive(Debug)]
pub struct BacktestResult {
    /// Strategy configuration used.
    pub strategy: StrategyConfig,

    /// Final state of the strategy's book.
    pub book: StrategyBook,

    /// Pricer with every option pricing made during the run.
    pub pricer: Pricer,

    /// Ticks replayed.
    pub ticks: usize,

    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl BacktestResult {
    pub fn name(&self) -> &str {
        &self.strategy.name
    }

    pub fn journal(&self) -> &Journal {
        self.book.journal()
    }

    pub fn asset_value_history(&self) -> &History {
        self.book.asset_value_history()
    }

    pub fn stock_value_history(&self) -> &History {
        self.book.stock_value_history()
    }

    pub fn option_premium_history(&self) -> &History {
        self.book.option_premium_history()
    }

    /// NAV at the last close, or starting cash if no day closed.
    pub fn final_value(&self) -> Decimal {
        self.asset_value_history()
            .last()
            .map(|(_, v)| *v)
            .unwrap_or_else(|| self.book.initial_cash())
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        MetricsCalculator::calculate(self)
    }

    /// Generate summary string.
    pub fn summary(&self) -> String {
        let period = match (self.start, self.end) {
            (Some(start), Some(end)) => format!("{} to {}", start.date(), end.date()),
            _ => "no data".to_string(),
        };
        format!(
            "Strategy {} ({}, {})\n{}",
            self.name(),
            self.strategy.kind.label(),
            period,
            self.metrics().summary()
        )
    }
}

/// The main backtesting engine.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run one strategy over the loader's ticks from the beginning.
    pub fn run(
        &self,
        strategy: StrategyConfig,
        md: &mut MarketDataLoader,
    ) -> Result<BacktestResult, BacktestError> {
        md.rewind();
        let mut strategy = Strategy::new(strategy, self.config.commission.clone());
        let mut pricer = Pricer::new(self.config.interest_rate);
        let mut start = None;
        let mut end = None;

        info!("Strategy ({}) backtesting ...", strategy.name());

        while let Some(tick) = md.next_tick() {
            start.get_or_insert(tick.time);
            end = Some(tick.time);
            strategy.book_mut().journal_mut().set_time(tick.time);

            let Some(bar) = tick.stock.as_ref() else {
                // Nothing to trade against before the first bar
                pricer.tick_event(&tick);
                continue;
            };

            pricer.val_event(tick.time, bar.open);
            strategy.tick_event(tick.time, bar.open);

            Self::process_orders(strategy.book_mut(), &mut pricer, bar)?;

            pricer.tick_event(&tick);

            if md.is_end_of_day() {
                Self::process_close(strategy.book_mut(), bar, tick.time.date())?;
            }
        }

        info!(
            "Strategy ({}) finished, {} ticks replayed",
            strategy.name(),
            md.tick_count()
        );

        let config = strategy.config().clone();
        Ok(BacktestResult {
            strategy: config,
            book: strategy.into_book(),
            pricer,
            ticks: md.tick_count(),
            start,
            end,
        })
    }

    /// Fill what can be filled on this bar; the rest stays pending.
    fn process_orders(
        book: &mut StrategyBook,
        pricer: &mut Pricer,
        bar: &StockBar,
    ) -> Result<(), BacktestError> {
        let mut remaining = Vec::new();

        for order in book.take_pending_orders() {
            book.journal_mut().info(format!("Order {}", order));

            let trade = match order.instrument.as_option() {
                Some(contract) => match pricer.market_price_or_theo(contract, order.side) {
                    Ok(premium) => {
                        let qty = order.qty;
                        Some(Trade::new(order, premium, qty))
                    }
                    Err(e) => {
                        book.journal_mut().error(format!("Cannot fill order {}: {}", order.id, e));
                        return Err(e.into());
                    }
                },
                None if bar.contains(order.price) => {
                    let (price, qty) = (order.price, order.qty);
                    Some(Trade::new(order, price, qty))
                }
                None => {
                    remaining.push(order);
                    None
                }
            };

            if let Some(trade) = trade {
                book.fill_event(trade);
            }
        }

        book.requeue(remaining);
        Ok(())
    }

    /// Settle options expiring on or before `date` at the bar's close.
    fn process_close(
        book: &mut StrategyBook,
        bar: &StockBar,
        date: NaiveDate,
    ) -> Result<(), BacktestError> {
        let due: Vec<Trade> = book
            .open_option_trades()
            .iter()
            .filter(|t| t.contract().is_some_and(|c| c.expiration.date() <= date))
            .cloned()
            .collect();

        let mut expired = Vec::new();
        for trade in due {
            let Some(contract) = trade.contract() else {
                continue;
            };
            if contract.option_type.is_itm(contract.strike, bar.close) {
                book.assignment_event(&trade, bar.close)?;
            } else {
                expired.push(trade);
            }
        }

        debug!("{}: close at {} with {} expiring", book.name(), bar.close, expired.len());
        book.close_event(&expired)?;
        book.log_stats();
        Ok(())
    }
}
