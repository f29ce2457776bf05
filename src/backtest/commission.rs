//! Commission model for stock and option fills.
//!
//! Default: commission-free, as with most retail brokers for these products.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{Instrument, Trade};

/// Configurable commission model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionModel {
    /// Commission per option contract.
    pub per_contract: Decimal,
    /// Commission per share of stock.
    pub per_share: Decimal,
    /// Minimum commission per order.
    pub min_per_order: Decimal,
    /// Maximum commission per order (0 = unlimited).
    pub max_per_order: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self::zero()
    }
}

impl CommissionModel {
    /// Create a per-contract model for options with free stock trades.
    pub fn new(per_contract: Decimal) -> Self {
        Self {
            per_contract,
            ..Self::zero()
        }
    }

    pub fn zero() -> Self {
        Self {
            per_contract: Decimal::ZERO,
            per_share: Decimal::ZERO,
            min_per_order: Decimal::ZERO,
            max_per_order: Decimal::ZERO,
        }
    }

    /// Calculate commission for a fill.
    pub fn calculate(&self, trade: &Trade) -> Decimal {
        let rate = match trade.order.instrument {
            Instrument::Option(_) => self.per_contract,
            Instrument::Stock(_) => self.per_share,
        };
        let mut total = rate * Decimal::from(trade.qty.abs());

        if total < self.min_per_order {
            total = self.min_per_order;
        }

        if self.max_per_order > Decimal::ZERO && total > self.max_per_order {
            total = self.max_per_order;
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::order::Order;
    use crate::data::{to_expiration, OptionContract, OptionType, Side};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn trade(instrument: Instrument, qty: i64) -> Trade {
        let order = Order {
            id: 0,
            side: Side::Sell,
            product: "SPY".into(),
            instrument,
            price: Decimal::ZERO,
            qty,
        };
        Trade::new(order, dec!(1), qty)
    }

    fn option() -> Instrument {
        let expiry = to_expiration(NaiveDate::from_ymd_opt(2025, 7, 18).unwrap());
        Instrument::Option(OptionContract::new("SPY", OptionType::Call, expiry, dec!(620)))
    }

    #[test]
    fn test_default_is_free() {
        let model = CommissionModel::default();
        assert_eq!(model.calculate(&trade(option(), 10)), dec!(0));
        assert_eq!(model.calculate(&trade(Instrument::Stock("SPY".into()), 100)), dec!(0));
    }

    #[test]
    fn test_per_contract() {
        let model = CommissionModel::new(dec!(0.65));
        assert_eq!(model.calculate(&trade(option(), 10)), dec!(6.5));
        assert_eq!(model.calculate(&trade(Instrument::Stock("SPY".into()), 100)), dec!(0));
    }

    #[test]
    fn test_min_and_max() {
        let model = CommissionModel {
            per_contract: dec!(1),
            per_share: dec!(0.005),
            min_per_order: dec!(1),
            max_per_order: dec!(5),
        };
        // 20 shares x 0.005 = 0.10, raised to the minimum
        assert_eq!(model.calculate(&trade(Instrument::Stock("SPY".into()), 20)), dec!(1));
        // 8 contracts capped at 5
        assert_eq!(model.calculate(&trade(option(), 8)), dec!(5));
    }
}
