//! Strategy book: cash, positions, orders and trade records.
//!
//! Every strategy owns one book. The engine feeds it fills, assignments and
//! market closes; the strategy's tick logic reads it to decide what to trade
//! next and queues orders through it.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use super::commission::CommissionModel;
use super::journal::Journal;
use super::order::{Instrument, Order, Trade};
use crate::data::{to_expiration, OptionContract, OptionType, Side, CONTRACT_SIZE};
use crate::pricing::{round_to_cent, PricingError};

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Order {0} has no open option trade")]
    TradeNotOpen(u64),

    #[error("Order {0} is not an option order")]
    NotAnOption(u64),

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),
}

/// A timestamped value series.
pub type History = Vec<(NaiveDateTime, Decimal)>;

#[derive(Debug, Clone)]
pub struct StrategyBook {
    name: String,
    product: String,
    next_order_id: u64,
    time: NaiveDateTime,
    initial_cash: Decimal,
    cash: Decimal,
    /// Net option premium collected (sold minus bought).
    option_premium_sum: Decimal,
    positions: BTreeMap<Instrument, i64>,
    pending_orders: Vec<Order>,
    trades: Vec<Trade>,
    open_option_trades: Vec<Trade>,
    expired_option_trades: Vec<Trade>,
    assigned_option_trades: Vec<Trade>,
    /// Latest price of the underlying.
    product_val: Decimal,
    commission: CommissionModel,
    total_commission: Decimal,
    journal: Journal,
    asset_value_history: History,
    stock_value_history: History,
    option_premium_history: History,
}

impl StrategyBook {
    pub fn new(name: &str, product: &str, cash: Decimal) -> Self {
        let journal = Journal::new();
        Self {
            name: name.to_string(),
            product: product.to_string(),
            next_order_id: 0,
            time: journal.time(),
            initial_cash: cash,
            cash,
            option_premium_sum: Decimal::ZERO,
            positions: BTreeMap::new(),
            pending_orders: Vec::new(),
            trades: Vec::new(),
            open_option_trades: Vec::new(),
            expired_option_trades: Vec::new(),
            assigned_option_trades: Vec::new(),
            product_val: Decimal::ZERO,
            commission: CommissionModel::default(),
            total_commission: Decimal::ZERO,
            journal,
            asset_value_history: Vec::new(),
            stock_value_history: Vec::new(),
            option_premium_history: Vec::new(),
        }
    }

    pub fn with_commission(mut self, commission: CommissionModel) -> Self {
        self.commission = commission;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn time(&self) -> NaiveDateTime {
        self.time
    }

    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn option_premium_sum(&self) -> Decimal {
        self.option_premium_sum
    }

    pub fn product_val(&self) -> Decimal {
        self.product_val
    }

    pub fn total_commission(&self) -> Decimal {
        self.total_commission
    }

    pub fn positions(&self) -> &BTreeMap<Instrument, i64> {
        &self.positions
    }

    pub fn position(&self, instrument: &Instrument) -> i64 {
        self.positions.get(instrument).copied().unwrap_or(0)
    }

    fn stock(&self) -> Instrument {
        Instrument::Stock(self.product.clone())
    }

    /// Shares of the product currently held (negative when short).
    pub fn stock_qty(&self) -> i64 {
        self.position(&self.stock())
    }

    pub fn holding_stock(&self) -> bool {
        self.stock_qty() > 0
    }

    pub fn pending_orders(&self) -> &[Order] {
        &self.pending_orders
    }

    pub fn has_pending_stock_order(&self) -> bool {
        self.pending_orders.iter().any(|o| !o.is_option())
    }

    /// Hand the queued orders to the engine.
    pub fn take_pending_orders(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.pending_orders)
    }

    /// Put back orders that did not fill.
    pub fn requeue(&mut self, orders: Vec<Order>) {
        self.pending_orders.extend(orders);
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn open_option_trades(&self) -> &[Trade] {
        &self.open_option_trades
    }

    pub fn expired_option_trades(&self) -> &[Trade] {
        &self.expired_option_trades
    }

    pub fn assigned_option_trades(&self) -> &[Trade] {
        &self.assigned_option_trades
    }

    pub fn num_option_trades(&self) -> usize {
        self.open_option_trades.len()
            + self.assigned_option_trades.len()
            + self.expired_option_trades.len()
    }

    /// Average net premium per option trade, rounded to the cent.
    pub fn avg_premium(&self) -> Decimal {
        match self.num_option_trades() {
            0 => Decimal::ZERO,
            n => round_to_cent(self.option_premium_sum / Decimal::from(n as i64)),
        }
    }

    pub fn stock_value(&self) -> Decimal {
        Decimal::from(self.stock_qty()) * self.product_val
    }

    /// Cash plus stock marked at the latest product value.
    pub fn nav(&self) -> Decimal {
        self.cash + self.stock_value()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    pub fn asset_value_history(&self) -> &History {
        &self.asset_value_history
    }

    pub fn stock_value_history(&self) -> &History {
        &self.stock_value_history
    }

    pub fn option_premium_history(&self) -> &History {
        &self.option_premium_history
    }

    /// Adjust a position; flat positions are dropped.
    pub fn add_position(&mut self, instrument: Instrument, qty: i64) {
        let entry = self.positions.entry(instrument).or_insert(0);
        *entry += qty;
        if *entry == 0 {
            self.positions.retain(|_, q| *q != 0);
        }
    }

    /// Record the latest time and underlying price.
    pub fn update(&mut self, time: NaiveDateTime, price: Decimal) {
        self.time = time;
        self.product_val = price;
    }

    // Market access

    /// Queue an option order, filled at market by the engine.
    ///
    /// Expires `dte` calendar days after the current time.
    pub fn send_order_option(
        &mut self,
        side: Side,
        option_type: OptionType,
        dte: i64,
        strike: Decimal,
        qty: i64,
    ) -> u64 {
        let expiration = to_expiration((self.time + TimeDelta::days(dte)).date());
        let contract = OptionContract::new(&self.product, option_type, expiration, strike);
        self.queue(side, Instrument::Option(contract), Decimal::ZERO, qty)
    }

    /// Queue a limit order for the product's stock.
    pub fn send_order_stock(&mut self, side: Side, price: Decimal, qty: i64) -> u64 {
        let instrument = self.stock();
        self.queue(side, instrument, price, qty)
    }

    fn queue(&mut self, side: Side, instrument: Instrument, price: Decimal, qty: i64) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        self.pending_orders.push(Order {
            id,
            side,
            product: self.product.clone(),
            instrument,
            price,
            qty,
        });
        id
    }

    // Market events

    /// Book an execution.
    pub fn fill_event(&mut self, trade: Trade) {
        self.journal.info(format!(
            "Order id={} filled at ${} x {}qty",
            trade.order.id, trade.price, trade.qty
        ));

        let premium = trade.premium();
        let order = &trade.order;
        let is_option = order.is_option();
        match order.side {
            Side::Buy => {
                self.cash -= premium;
                if is_option {
                    self.option_premium_sum -= premium;
                }
            }
            Side::Sell => {
                self.cash += premium;
                if is_option {
                    self.option_premium_sum += premium;
                }
            }
        }
        self.add_position(order.instrument.clone(), order.side.sign() * trade.qty);

        let commission = self.commission.calculate(&trade);
        if commission > Decimal::ZERO {
            self.cash -= commission;
            self.total_commission += commission;
            self.journal.info(format!("Commission ${}", commission));
        }

        if is_option {
            self.open_option_trades.push(trade.clone());
        }
        self.trades.push(trade);
    }

    fn take_open_trade(&mut self, order_id: u64) -> Result<Trade, BacktestError> {
        let index = self
            .open_option_trades
            .iter()
            .position(|t| t.order.id == order_id)
            .ok_or(BacktestError::TradeNotOpen(order_id))?;
        Ok(self.open_option_trades.remove(index))
    }

    /// Settle an in-the-money option at expiration.
    ///
    /// The option position is closed and shares change hands at the strike:
    /// short calls and long puts deliver shares, short puts and long calls
    /// receive them.
    pub fn assignment_event(&mut self, trade: &Trade, spot: Decimal) -> Result<(), BacktestError> {
        let order_id = trade.order.id;
        let contract = trade
            .contract()
            .cloned()
            .ok_or(BacktestError::NotAnOption(order_id))?;
        let trade = self.take_open_trade(order_id)?;

        let verb = match trade.order.side {
            Side::Sell => "Assigned",
            Side::Buy => "Exercised",
        };
        self.journal
            .info(format!("{} {}, spot price = ${}", verb, contract, spot));

        let direction = match contract.option_type {
            OptionType::Call => 1,
            OptionType::Put => -1,
        };
        let shares = trade.order.side.sign() * direction * trade.qty * CONTRACT_SIZE;

        self.add_position(trade.order.instrument.clone(), -trade.order.signed_qty());
        self.add_position(self.stock(), shares);
        self.cash -= contract.strike * Decimal::from(shares);

        debug!(
            "{}: {} {} -> {} shares at {}",
            self.name, verb, contract, shares, contract.strike
        );
        self.assigned_option_trades.push(trade);
        Ok(())
    }

    /// Handle the market close: retire expired options and record NAV.
    pub fn close_event(&mut self, expired: &[Trade]) -> Result<(), BacktestError> {
        for trade in expired {
            if !trade.order.is_option() {
                return Err(BacktestError::NotAnOption(trade.order.id));
            }
            let trade = self.take_open_trade(trade.order.id)?;
            self.add_position(trade.order.instrument.clone(), -trade.order.signed_qty());
            self.journal
                .info(format!("Expired {}", trade.order.instrument));
            self.expired_option_trades.push(trade);
        }

        let stock_value = self.stock_value();
        let nav = self.cash + stock_value;
        self.asset_value_history.push((self.time, nav));
        self.stock_value_history.push((self.time, stock_value));
        self.option_premium_history
            .push((self.time, self.option_premium_sum));
        Ok(())
    }

    pub fn log_stats(&mut self) {
        let stats = format!(
            "Strategy stats:\n\tTrades: {} open, {} assigned, {} expired, avg premium = ${}\n\tCash: ${:.2}\n\tPosition: {}",
            self.open_option_trades.len(),
            self.assigned_option_trades.len(),
            self.expired_option_trades.len(),
            self.avg_premium(),
            self.cash,
            self.format_positions()
        );
        self.journal.info(stats);
    }

    fn format_positions(&self) -> String {
        let entries: Vec<String> = self
            .positions
            .iter()
            .map(|(instrument, qty)| format!("{}: {}", instrument, qty))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn book() -> StrategyBook {
        let mut book = StrategyBook::new("test", "SPY", dec!(100_000));
        book.update(at(14, 10, 0), dec!(600));
        book
    }

    /// Queue and fill the first pending order at `price`.
    fn fill_next(book: &mut StrategyBook, price: Decimal) -> Trade {
        let order = book.take_pending_orders().remove(0);
        let qty = order.qty;
        let trade = Trade::new(order, price, qty);
        book.fill_event(trade.clone());
        trade
    }

    #[test]
    fn test_send_order_option() {
        let mut book = book();
        let id = book.send_order_option(Side::Sell, OptionType::Put, 4, dec!(595), 1);
        assert_eq!(id, 0);

        let order = &book.pending_orders()[0];
        let contract = order.instrument.as_option().unwrap();
        assert_eq!(contract.expiration, at(18, 16, 30));
        assert_eq!(contract.strike, dec!(595));
        assert_eq!(order.price, Decimal::ZERO);

        assert_eq!(book.send_order_stock(Side::Buy, dec!(600), 10), 1);
        assert!(book.has_pending_stock_order());
    }

    #[test]
    fn test_fill_sell_put() {
        let mut book = book();
        book.send_order_option(Side::Sell, OptionType::Put, 1, dec!(595), 1);
        let trade = fill_next(&mut book, dec!(1.50));

        assert_eq!(book.cash(), dec!(100_150));
        assert_eq!(book.option_premium_sum(), dec!(150));
        assert_eq!(book.position(&trade.order.instrument), -1);
        assert_eq!(book.open_option_trades().len(), 1);
        assert_eq!(book.trades().len(), 1);
        assert!(book.pending_orders().is_empty());
    }

    #[test]
    fn test_fill_stock_round_trip() {
        let mut book = book();
        book.send_order_stock(Side::Buy, dec!(600), 100);
        fill_next(&mut book, dec!(600));
        assert_eq!(book.cash(), dec!(40_000));
        assert_eq!(book.stock_qty(), 100);
        assert!(book.holding_stock());
        assert_eq!(book.nav(), dec!(100_000));
        assert_eq!(book.option_premium_sum(), Decimal::ZERO);
        assert!(book.open_option_trades().is_empty());

        book.send_order_stock(Side::Sell, dec!(610), 100);
        fill_next(&mut book, dec!(610));
        assert_eq!(book.cash(), dec!(101_000));
        assert!(book.positions().is_empty());
    }

    #[test]
    fn test_put_assignment() {
        let mut book = book();
        book.send_order_option(Side::Sell, OptionType::Put, 0, dec!(595), 2);
        let trade = fill_next(&mut book, dec!(0.40));
        assert_eq!(book.cash(), dec!(100_080));

        book.assignment_event(&trade, dec!(590)).unwrap();

        // Two contracts deliver 200 shares at the strike
        assert_eq!(book.stock_qty(), 200);
        assert_eq!(book.cash(), dec!(100_080) - dec!(119_000));
        assert_eq!(book.position(&trade.order.instrument), 0);
        assert!(book.open_option_trades().is_empty());
        assert_eq!(book.assigned_option_trades().len(), 1);
    }

    #[test]
    fn test_call_assignment() {
        let mut book = book();
        book.send_order_stock(Side::Buy, dec!(600), 100);
        fill_next(&mut book, dec!(600));
        book.send_order_option(Side::Sell, OptionType::Call, 7, dec!(615), 1);
        let trade = fill_next(&mut book, dec!(1));

        book.assignment_event(&trade, dec!(620)).unwrap();
        assert_eq!(book.stock_qty(), 0);
        assert!(book.positions().is_empty());
        // 100k - 60k + 100 premium + 61.5k strike
        assert_eq!(book.cash(), dec!(101_600));
    }

    #[test]
    fn test_long_call_exercise() {
        let mut book = book();
        book.send_order_option(Side::Buy, OptionType::Call, 0, dec!(600), 1);
        let trade = fill_next(&mut book, dec!(2));
        assert_eq!(book.option_premium_sum(), dec!(-200));

        book.assignment_event(&trade, dec!(605)).unwrap();
        assert_eq!(book.stock_qty(), 100);
        assert_eq!(book.cash(), dec!(100_000) - dec!(200) - dec!(60_000));
    }

    #[test]
    fn test_assignment_requires_open_trade() {
        let mut book = book();
        book.send_order_option(Side::Sell, OptionType::Put, 0, dec!(595), 1);
        let trade = fill_next(&mut book, dec!(0.40));
        book.assignment_event(&trade, dec!(590)).unwrap();

        let again = book.assignment_event(&trade, dec!(590));
        assert!(matches!(again, Err(BacktestError::TradeNotOpen(0))));

        book.send_order_stock(Side::Buy, dec!(600), 1);
        let stock = fill_next(&mut book, dec!(600));
        assert!(matches!(
            book.assignment_event(&stock, dec!(600)),
            Err(BacktestError::NotAnOption(1))
        ));
    }

    #[test]
    fn test_close_event_expires_and_records_nav() {
        let mut book = book();
        book.send_order_stock(Side::Buy, dec!(600), 100);
        fill_next(&mut book, dec!(600));
        book.send_order_option(Side::Sell, OptionType::Call, 0, dec!(610), 1);
        let trade = fill_next(&mut book, dec!(0.75));

        book.update(at(14, 15, 0), dec!(605));
        book.close_event(&[trade]).unwrap();

        assert!(book.open_option_trades().is_empty());
        assert_eq!(book.expired_option_trades().len(), 1);
        assert_eq!(book.positions().len(), 1);

        // NAV = 40k + 75 premium + 100 x 605
        let (time, nav) = book.asset_value_history()[0];
        assert_eq!(time, at(14, 15, 0));
        assert_eq!(nav, dec!(100_575));
        assert_eq!(book.stock_value_history()[0].1, dec!(60_500));
        assert_eq!(book.option_premium_history()[0].1, dec!(75));
    }

    #[test]
    fn test_commission_deducted() {
        let mut book = book().with_commission(CommissionModel::new(dec!(0.65)));
        book.send_order_option(Side::Sell, OptionType::Put, 1, dec!(595), 3);
        fill_next(&mut book, dec!(1));
        assert_eq!(book.cash(), dec!(100_300) - dec!(1.95));
        assert_eq!(book.total_commission(), dec!(1.95));
    }

    #[test]
    fn test_add_position_removes_flat() {
        let mut book = book();
        let stock = Instrument::Stock("SPY".into());
        book.add_position(stock.clone(), 5);
        book.add_position(stock.clone(), -5);
        assert!(book.positions().is_empty());
        assert_eq!(book.position(&stock), 0);
    }

    #[test]
    fn test_log_stats() {
        let mut book = book();
        book.journal_mut().set_time(at(14, 15, 0));
        book.send_order_option(Side::Sell, OptionType::Put, 1, dec!(595), 1);
        fill_next(&mut book, dec!(1.234));
        book.log_stats();

        let last = book.journal().lines().last().unwrap();
        assert!(last.starts_with("[2025-07-14 15:00:00] Strategy stats:"));
        assert!(last.contains("1 open, 0 assigned, 0 expired, avg premium = $123.40"));
        assert!(last.contains("Cash: $100123.40"));
        assert!(last.contains("Position: {SPY20250715-P595: -1}"));
    }
}
