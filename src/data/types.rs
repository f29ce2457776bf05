//! Core market data types.
//!
//! These types represent the market data replayed by the backtester: stock
//! bars, option quotes from scraped chain snapshots, and the merged tick that
//! combines both at one point in time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shares delivered per option contract.
pub const CONTRACT_SIZE: i64 = 100;

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }

    /// Whether an option of this type is in the money at `spot`.
    ///
    /// At-the-money counts as in the money, matching exchange auto-exercise
    /// treatment of the closing print.
    pub fn is_itm(&self, strike: Decimal, spot: Decimal) -> bool {
        match self {
            Self::Call => spot >= strike,
            Self::Put => spot <= strike,
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

/// Convert an expiration date into the last exercisable moment.
///
/// Options stop trading at 4pm ET but can be exercised until 5:30pm ET,
/// i.e. 16:30 in exchange-local (Central) time.
pub fn to_expiration(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(16, 30, 0).unwrap_or_default())
}

/// A listed option contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying symbol (e.g., "SPY")
    pub product: String,
    pub option_type: OptionType,
    /// Last exercisable moment, see [`to_expiration`].
    pub expiration: NaiveDateTime,
    pub strike: Decimal,
}

impl OptionContract {
    pub fn new(
        product: &str,
        option_type: OptionType,
        expiration: NaiveDateTime,
        strike: Decimal,
    ) -> Self {
        Self {
            product: product.to_string(),
            option_type,
            expiration,
            strike,
        }
    }

    /// OCC-style contract symbol, e.g. `SPY250718C00620000`.
    ///
    /// This is the symbol Yahoo Finance reports in `contractSymbol`, so it is
    /// the key used to look up quotes for a contract.
    pub fn occ_symbol(&self) -> String {
        let strike_millis = (self.strike * Decimal::from(1000))
            .round()
            .to_i64()
            .unwrap_or_default();
        format!(
            "{}{}{}{:08}",
            self.product,
            self.expiration.format("%y%m%d"),
            self.option_type.as_str(),
            strike_millis
        )
    }

    /// Parse an OCC-style contract symbol.
    pub fn from_occ_symbol(symbol: &str) -> Option<Self> {
        // 6 date digits + 1 type letter + 8 strike digits
        if symbol.len() <= 15 || !symbol.is_ascii() {
            return None;
        }
        let (product, rest) = symbol.split_at(symbol.len() - 15);
        let date = NaiveDate::parse_from_str(&rest[..6], "%y%m%d").ok()?;
        let option_type = OptionType::from_str(&rest[6..7])?;
        let strike_millis: i64 = rest[7..].parse().ok()?;
        let strike = Decimal::new(strike_millis, 3).normalize();

        Some(Self {
            product: product.to_string(),
            option_type,
            expiration: to_expiration(date),
            strike,
        })
    }
}

impl fmt::Display for OptionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}-{}{}",
            self.product,
            self.expiration.format("%Y%m%d"),
            self.option_type.as_str(),
            self.strike
        )
    }
}

/// One intraday bar for the underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockBar {
    pub time: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl StockBar {
    /// Whether a limit price traded within this bar's range.
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }
}

/// A single option quote from a chain snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// OCC contract symbol
    pub symbol: String,

    /// Snapshot time
    pub time: NaiveDateTime,

    pub bid: Decimal,
    pub ask: Decimal,

    /// Last traded price
    pub last: Decimal,

    /// Yahoo-reported implied volatility
    pub implied_volatility: f64,

    pub volume: i64,
}

impl OptionQuote {
    /// Whether both sides of the market are quoted.
    pub fn is_two_sided(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }
}

/// Option chain snapshot keyed by contract symbol.
pub type OptionChain = HashMap<String, OptionQuote>;

/// Snapshot of the market combining both stock and options.
#[derive(Debug, Clone)]
pub struct Tick {
    pub time: NaiveDateTime,

    /// Latest stock bar at or before `time`; `None` until the first bar.
    pub stock: Option<StockBar>,

    /// Latest option chain at or before `time`.
    pub options: Arc<OptionChain>,
}
