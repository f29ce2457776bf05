//! Option-selling strategies.
//!
//! A strategy is a [`StrategyConfig`] (name, capital, entry rules) plus a
//! [`StrategyKind`] whose tick logic reads the [`StrategyBook`] and queues
//! orders on it. Strategies are declared in the config file, e.g.
//!
//! ```toml
//! [[strategies]]
//! name = "wheel-1dte-1pct"
//! kind = "wheel"
//! dte = 1
//! put_otm_pct = 0.01
//! call_otm_pct = 0.01
//! ```

use chrono::{NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::book::StrategyBook;
use super::commission::CommissionModel;
use crate::data::{OptionType, Side};

fn default_product() -> String {
    "SPY".to_string()
}

fn default_cash() -> Decimal {
    Decimal::from(50_000)
}

fn default_strike_step() -> Decimal {
    Decimal::from(5)
}

fn default_entry_hour() -> u32 {
    10
}

fn default_contracts() -> i64 {
    1
}

/// What the strategy trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    /// Sell puts while flat; once assigned, sell calls against the shares.
    Wheel {
        put_otm_pct: Decimal,
        call_otm_pct: Decimal,
        dte: i64,
    },
    /// Buy the stock with all cash, then keep selling calls against it.
    CoveredCall { call_otm_pct: Decimal, dte: i64 },
    /// Sell puts; sell any assigned shares straight away.
    SellPut { put_otm_pct: Decimal, dte: i64 },
    /// Buy the stock with all cash and hold it.
    HoldStock,
}

impl StrategyKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Wheel { .. } => "wheel",
            Self::CoveredCall { .. } => "covered call",
            Self::SellPut { .. } => "sell put",
            Self::HoldStock => "hold stock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,

    /// Underlying symbol
    #[serde(default = "default_product")]
    pub product: String,

    /// Starting cash
    #[serde(default = "default_cash")]
    pub cash: Decimal,

    /// Listed strike spacing
    #[serde(default = "default_strike_step")]
    pub strike_step: Decimal,

    /// Options are only opened from this hour on
    #[serde(default = "default_entry_hour")]
    pub entry_hour: u32,

    /// Contracts per option order
    #[serde(default = "default_contracts")]
    pub contracts: i64,

    #[serde(flatten)]
    pub kind: StrategyKind,
}

impl StrategyConfig {
    pub fn new(name: &str, kind: StrategyKind) -> Self {
        Self {
            name: name.to_string(),
            product: default_product(),
            cash: default_cash(),
            strike_step: default_strike_step(),
            entry_hour: default_entry_hour(),
            contracts: default_contracts(),
            kind,
        }
    }

    /// The five strategies compared by a default run.
    pub fn defaults() -> Vec<Self> {
        let pct = |hundredths: i64| Decimal::new(hundredths, 2);
        vec![
            Self::new(
                "covered-call",
                StrategyKind::CoveredCall {
                    call_otm_pct: pct(2),
                    dte: 7,
                },
            ),
            Self::new(
                "sell-put",
                StrategyKind::SellPut {
                    put_otm_pct: pct(1),
                    dte: 1,
                },
            ),
            Self::new(
                "wheel-0dte-1pct",
                StrategyKind::Wheel {
                    put_otm_pct: pct(1),
                    call_otm_pct: pct(1),
                    dte: 0,
                },
            ),
            Self::new(
                "wheel-1dte-1pct",
                StrategyKind::Wheel {
                    put_otm_pct: pct(1),
                    call_otm_pct: pct(1),
                    dte: 1,
                },
            ),
            Self::new("SPY spot", StrategyKind::HoldStock),
        ]
    }
}

/// Strike `otm_pct` away from `price` on the out-of-the-money side, snapped
/// to a listed strike: calls round up, puts round down.
pub fn compute_strike(
    price: Decimal,
    otm_pct: Decimal,
    step: Decimal,
    option_type: OptionType,
) -> Decimal {
    if step <= Decimal::ZERO {
        return price;
    }
    match option_type {
        OptionType::Call => {
            let target = price * (Decimal::ONE + otm_pct);
            (target / step).ceil() * step
        }
        OptionType::Put => {
            let target = price * (Decimal::ONE - otm_pct);
            (target / step).floor() * step
        }
    }
}

/// A configured strategy and its book.
#[derive(Debug, Clone)]
pub struct Strategy {
    config: StrategyConfig,
    book: StrategyBook,
}

impl Strategy {
    pub fn new(config: StrategyConfig, commission: CommissionModel) -> Self {
        let book =
            StrategyBook::new(&config.name, &config.product, config.cash).with_commission(commission);
        Self { config, book }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn book(&self) -> &StrategyBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut StrategyBook {
        &mut self.book
    }

    pub fn into_book(self) -> StrategyBook {
        self.book
    }

    /// New underlying price: update the book, then run the strategy logic.
    pub fn tick_event(&mut self, time: NaiveDateTime, price: Decimal) {
        self.book.update(time, price);
        self.tick_logic(time, price);
    }

    fn can_open_option(&self, time: NaiveDateTime) -> bool {
        time.hour() >= self.config.entry_hour && self.book.open_option_trades().is_empty()
    }

    fn sell_option(&mut self, option_type: OptionType, otm_pct: Decimal, dte: i64, price: Decimal) {
        let strike = compute_strike(price, otm_pct, self.config.strike_step, option_type);
        self.book
            .send_order_option(Side::Sell, option_type, dte, strike, self.config.contracts);
    }

    /// Buy as many whole shares as cash allows at `price`.
    fn buy_all_stock(&mut self, price: Decimal) {
        if price <= Decimal::ZERO || self.book.has_pending_stock_order() {
            return;
        }
        let qty = (self.book.cash() / price).floor();
        match i64::try_from(qty) {
            Ok(qty) if qty > 0 => {
                self.book.send_order_stock(Side::Buy, price, qty);
            }
            _ => self
                .book
                .journal_mut()
                .info(format!("Not enough cash to buy {} at ${}", self.config.product, price)),
        }
    }

    fn tick_logic(&mut self, time: NaiveDateTime, price: Decimal) {
        match self.config.kind.clone() {
            StrategyKind::Wheel {
                put_otm_pct,
                call_otm_pct,
                dte,
            } => {
                if self.can_open_option(time) {
                    if self.book.holding_stock() {
                        self.sell_option(OptionType::Call, call_otm_pct, dte, price);
                    } else {
                        self.sell_option(OptionType::Put, put_otm_pct, dte, price);
                    }
                }
            }
            StrategyKind::CoveredCall { call_otm_pct, dte } => {
                if self.can_open_option(time) {
                    if self.book.holding_stock() {
                        self.sell_option(OptionType::Call, call_otm_pct, dte, price);
                    } else {
                        self.buy_all_stock(price);
                    }
                }
            }
            StrategyKind::SellPut { put_otm_pct, dte } => {
                if self.book.holding_stock() {
                    // Exit assigned shares as soon as possible
                    if !self.book.has_pending_stock_order() {
                        let qty = self.book.stock_qty();
                        self.book.send_order_stock(Side::Sell, price, qty);
                    }
                } else if self.can_open_option(time) {
                    self.sell_option(OptionType::Put, put_otm_pct, dte, price);
                }
            }
            StrategyKind::HoldStock => {
                if !self.book.holding_stock() {
                    self.buy_all_stock(price);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::order::{Instrument, Trade};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn strategy(kind: StrategyKind) -> Strategy {
        Strategy::new(StrategyConfig::new("test", kind), CommissionModel::zero())
    }

    fn fill_all(strategy: &mut Strategy, price: Decimal) {
        for order in strategy.book_mut().take_pending_orders() {
            let qty = order.qty;
            strategy.book_mut().fill_event(Trade::new(order, price, qty));
        }
    }

    fn wheel() -> StrategyKind {
        StrategyKind::Wheel {
            put_otm_pct: dec!(0.01),
            call_otm_pct: dec!(0.01),
            dte: 1,
        }
    }

    #[test]
    fn test_compute_strike() {
        // 600 x 1.02 = 612 -> 615
        assert_eq!(compute_strike(dec!(600), dec!(0.02), dec!(5), OptionType::Call), dec!(615));
        // 600 x 0.99 = 594 -> 590
        assert_eq!(compute_strike(dec!(600), dec!(0.01), dec!(5), OptionType::Put), dec!(590));
        // Exact multiples stay put
        assert_eq!(compute_strike(dec!(500), dec!(0.01), dec!(5), OptionType::Call), dec!(505));
        assert_eq!(compute_strike(dec!(500), dec!(0.01), dec!(5), OptionType::Put), dec!(495));
        assert_eq!(compute_strike(dec!(623.37), dec!(0), dec!(1), OptionType::Call), dec!(624));
    }

    #[test]
    fn test_wheel_waits_for_entry_hour() {
        let mut s = strategy(wheel());
        s.tick_event(at(9, 45), dec!(600));
        assert!(s.book().pending_orders().is_empty());

        s.tick_event(at(10, 0), dec!(600));
        let order = &s.book().pending_orders()[0];
        assert_eq!(order.side, Side::Sell);
        let contract = order.instrument.as_option().unwrap();
        assert_eq!(contract.option_type, OptionType::Put);
        assert_eq!(contract.strike, dec!(590));
    }

    #[test]
    fn test_wheel_one_option_at_a_time() {
        let mut s = strategy(wheel());
        s.tick_event(at(10, 0), dec!(600));
        fill_all(&mut s, dec!(0.5));
        s.tick_event(at(10, 15), dec!(600));
        assert!(s.book().pending_orders().is_empty());
    }

    #[test]
    fn test_wheel_sells_calls_when_holding() {
        let mut s = strategy(wheel());
        s.book_mut().add_position(Instrument::Stock("SPY".into()), 100);
        s.tick_event(at(11, 0), dec!(600));
        let contract = s.book().pending_orders()[0].instrument.as_option().unwrap();
        assert_eq!(contract.option_type, OptionType::Call);
        assert_eq!(contract.strike, dec!(610));
    }

    #[test]
    fn test_covered_call_buys_stock_first() {
        let mut s = strategy(StrategyKind::CoveredCall {
            call_otm_pct: dec!(0.02),
            dte: 7,
        });
        s.tick_event(at(10, 0), dec!(600));
        let order = &s.book().pending_orders()[0];
        assert!(!order.is_option());
        // floor(50000 / 600)
        assert_eq!(order.qty, 83);

        // No duplicate while the stock order is pending
        s.tick_event(at(10, 15), dec!(600));
        assert_eq!(s.book().pending_orders().len(), 1);

        fill_all(&mut s, dec!(600));
        s.tick_event(at(10, 30), dec!(600));
        let contract = s.book().pending_orders()[0].instrument.as_option().unwrap();
        assert_eq!(contract.option_type, OptionType::Call);
        assert_eq!(contract.strike, dec!(615));
        assert_eq!(contract.expiration.date(), NaiveDate::from_ymd_opt(2025, 7, 21).unwrap());
    }

    #[test]
    fn test_sell_put_exits_stock() {
        let mut s = strategy(StrategyKind::SellPut {
            put_otm_pct: dec!(0.01),
            dte: 1,
        });
        s.book_mut().add_position(Instrument::Stock("SPY".into()), 100);
        s.tick_event(at(9, 30), dec!(590));

        let order = &s.book().pending_orders()[0];
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.qty, 100);
        assert_eq!(order.price, dec!(590));
        assert_eq!(order.instrument, Instrument::Stock("SPY".into()));
    }

    #[test]
    fn test_hold_stock() {
        let mut s = strategy(StrategyKind::HoldStock);
        s.tick_event(at(8, 30), dec!(625));
        assert_eq!(s.book().pending_orders()[0].qty, 80);
        fill_all(&mut s, dec!(625));

        s.tick_event(at(8, 45), dec!(630));
        assert!(s.book().pending_orders().is_empty());
        assert_eq!(s.book().nav(), dec!(50_400));
    }

    #[test]
    fn test_insufficient_cash() {
        let mut config = StrategyConfig::new("tiny", StrategyKind::HoldStock);
        config.cash = dec!(100);
        let mut s = Strategy::new(config, CommissionModel::zero());
        s.tick_event(at(10, 0), dec!(600));
        assert!(s.book().pending_orders().is_empty());
        assert!(s.book().journal().lines()[0].contains("Not enough cash"));
    }

    #[test]
    fn test_config_from_toml() {
        let config: StrategyConfig = toml::from_str(
            r#"
            name = "wheel-1dte-1pct"
            kind = "wheel"
            dte = 1
            put_otm_pct = 0.01
            call_otm_pct = 0.015
            cash = 25000
            "#,
        )
        .unwrap();
        assert_eq!(config.product, "SPY");
        assert_eq!(config.cash, dec!(25000));
        assert_eq!(config.strike_step, dec!(5));
        assert_eq!(
            config.kind,
            StrategyKind::Wheel {
                put_otm_pct: dec!(0.01),
                call_otm_pct: dec!(0.015),
                dte: 1,
            }
        );

        let hold: StrategyConfig = toml::from_str("name = \"spot\"\nkind = \"hold_stock\"").unwrap();
        assert_eq!(hold.kind, StrategyKind::HoldStock);
    }

    #[test]
    fn test_default_strategies() {
        let defaults = StrategyConfig::defaults();
        assert_eq!(defaults.len(), 5);
        assert!(defaults.iter().all(|s| s.cash == dec!(50_000)));
        assert_eq!(defaults[4].kind.label(), "hold stock");
    }
}
