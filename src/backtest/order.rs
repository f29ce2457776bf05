//! Orders, trades and the instruments they reference.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{OptionContract, Side, CONTRACT_SIZE};

/// Something a strategy can hold a position in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Instrument {
    /// Shares of the underlying, keyed by symbol.
    Stock(String),
    Option(OptionContract),
}

impl Instrument {
    pub fn is_option(&self) -> bool {
        matches!(self, Self::Option(_))
    }

    pub fn as_option(&self) -> Option<&OptionContract> {
        match self {
            Self::Option(contract) => Some(contract),
            Self::Stock(_) => None,
        }
    }

    /// Units delivered per traded quantity.
    pub fn multiplier(&self) -> i64 {
        match self {
            Self::Stock(_) => 1,
            Self::Option(_) => CONTRACT_SIZE,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stock(symbol) => write!(f, "{}", symbol),
            Self::Option(contract) => write!(f, "{}", contract),
        }
    }
}

/// An order queued by a strategy.
///
/// Option orders are filled at market, so `price` is only meaningful for
/// stock orders where it is the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub side: Side,
    /// Underlying symbol
    pub product: String,
    pub instrument: Instrument,
    pub price: Decimal,
    pub qty: i64,
}

impl Order {
    pub fn is_option(&self) -> bool {
        self.instrument.is_option()
    }

    /// Signed position change once filled.
    pub fn signed_qty(&self) -> i64 {
        self.side.sign() * self.qty
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} {} {} at ${} x {}qty",
            self.id,
            self.side.as_str(),
            self.instrument,
            self.price,
            self.qty
        )
    }
}

/// An executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order: Order,
    /// Fill price per unit (per share for options)
    pub price: Decimal,
    pub qty: i64,
}

impl Trade {
    pub fn new(order: Order, price: Decimal, qty: i64) -> Self {
        Self { order, price, qty }
    }

    /// Cash paid or received for this trade.
    pub fn premium(&self) -> Decimal {
        self.price * Decimal::from(self.qty) * Decimal::from(self.order.instrument.multiplier())
    }

    pub fn contract(&self) -> Option<&OptionContract> {
        self.order.instrument.as_option()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{to_expiration, OptionType};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn put() -> OptionContract {
        let expiry = to_expiration(NaiveDate::from_ymd_opt(2025, 7, 18).unwrap());
        OptionContract::new("SPY", OptionType::Put, expiry, dec!(600))
    }

    #[test]
    fn test_option_premium() {
        let order = Order {
            id: 3,
            side: Side::Sell,
            product: "SPY".into(),
            instrument: Instrument::Option(put()),
            price: Decimal::ZERO,
            qty: 2,
        };
        let trade = Trade::new(order, dec!(1.25), 2);

        // 1.25 x 2 contracts x 100 shares
        assert_eq!(trade.premium(), dec!(250));
        assert_eq!(trade.contract(), Some(&put()));
        assert_eq!(trade.order.signed_qty(), -2);
    }

    #[test]
    fn test_stock_premium() {
        let order = Order {
            id: 0,
            side: Side::Buy,
            product: "SPY".into(),
            instrument: Instrument::Stock("SPY".into()),
            price: dec!(600.5),
            qty: 83,
        };
        assert!(!order.is_option());
        assert_eq!(order.to_string(), "id=0 BUY SPY at $600.5 x 83qty");

        let trade = Trade::new(order, dec!(600.5), 83);
        assert_eq!(trade.premium(), dec!(49841.5));
        assert!(trade.contract().is_none());
    }
}
