//! Option pricer used to fill option orders during a backtest.
//!
//! Fills at the quoted market when the latest scraped chain has a two-sided
//! quote for the contract (bid for sells, ask for buys), and at the
//! Black-Scholes value otherwise. Every pricing is kept so the run can be
//! audited afterwards.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use polars::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::black_scholes::{estimate_iv, BlackScholes};
use crate::data::{OptionChain, OptionContract, OptionQuote, Side, Tick};

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("No underlying price before pricing {0}")]
    NoUnderlyingPrice(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a fill price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    Market,
    Theoretical,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Theoretical => "theo",
        }
    }
}

/// One recorded pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub time: NaiveDateTime,
    pub symbol: String,
    pub side: Side,
    pub spot: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub vol: f64,
    pub theoretical: Decimal,
    pub price: Decimal,
    pub source: PriceSource,
}

#[derive(Debug)]
pub struct Pricer {
    bs: BlackScholes,
    time: Option<NaiveDateTime>,
    spot: Option<Decimal>,
    chain: Arc<OptionChain>,
    history: Vec<PriceObservation>,
}

impl Pricer {
    pub fn new(rate: f64) -> Self {
        Self {
            bs: BlackScholes::new(rate, 0.0),
            time: None,
            spot: None,
            chain: Arc::new(OptionChain::new()),
            history: Vec::new(),
        }
    }

    /// Latest underlying value.
    pub fn val_event(&mut self, time: NaiveDateTime, val: Decimal) {
        self.time = Some(time);
        self.spot = Some(val);
    }

    /// Latest full market snapshot.
    pub fn tick_event(&mut self, tick: &Tick) {
        self.time = Some(tick.time);
        self.chain = Arc::clone(&tick.options);
    }

    pub fn quote(&self, contract: &OptionContract) -> Option<&OptionQuote> {
        self.chain.get(&contract.occ_symbol())
    }

    /// Volatility used for the theoretical value: the quoted IV when the
    /// chain has one, otherwise the moneyness estimate.
    fn vol_for(&self, contract: &OptionContract, spot: f64) -> f64 {
        match self.quote(contract) {
            Some(q) if q.implied_volatility > 0.0 => q.implied_volatility,
            _ => {
                let strike: f64 = contract.strike.try_into().unwrap_or(0.0);
                estimate_iv(strike, spot)
            }
        }
    }

    /// Black-Scholes value of a contract at the latest time and spot.
    pub fn theoretical_price(&self, contract: &OptionContract) -> Result<Decimal, PricingError> {
        let (time, spot) = self.state(contract)?;
        let spot_f: f64 = spot.try_into().unwrap_or(0.0);
        let vol = self.vol_for(contract, spot_f);
        Ok(self.bs.theoretical(contract, time, spot_f, vol))
    }

    fn state(&self, contract: &OptionContract) -> Result<(NaiveDateTime, Decimal), PricingError> {
        match (self.time, self.spot) {
            (Some(time), Some(spot)) if spot > Decimal::ZERO => Ok((time, spot)),
            _ => Err(PricingError::NoUnderlyingPrice(contract.to_string())),
        }
    }

    /// Fill price for an option order: the quoted side of the market when
    /// two-sided, otherwise the theoretical value.
    pub fn market_price_or_theo(
        &mut self,
        contract: &OptionContract,
        side: Side,
    ) -> Result<Decimal, PricingError> {
        let (time, spot) = self.state(contract)?;
        let spot_f: f64 = spot.try_into().unwrap_or(0.0);
        let vol = self.vol_for(contract, spot_f);
        let theoretical = self.bs.theoretical(contract, time, spot_f, vol);

        let quote = self.quote(contract).cloned();
        let (price, source) = match &quote {
            Some(q) if q.is_two_sided() => {
                let px = match side {
                    Side::Buy => q.ask,
                    Side::Sell => q.bid,
                };
                (px, PriceSource::Market)
            }
            _ => (theoretical, PriceSource::Theoretical),
        };

        debug!(
            "[{}] {} {} at {} ({}), spot={}, vol={:.4}",
            time,
            side.as_str(),
            contract,
            price,
            source.as_str(),
            spot,
            vol
        );

        self.history.push(PriceObservation {
            time,
            symbol: contract.occ_symbol(),
            side,
            spot,
            bid: quote.as_ref().map(|q| q.bid),
            ask: quote.as_ref().map(|q| q.ask),
            vol,
            theoretical,
            price,
            source,
        });

        Ok(price)
    }

    pub fn history(&self) -> &[PriceObservation] {
        &self.history
    }

    /// Write all recorded pricings to CSV, market and theoretical side by side.
    ///
    /// Returns the number of rows written.
    pub fn write_price_matrix(&self, path: &Path) -> Result<usize, PricingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let to_f64 = |d: Decimal| -> f64 { d.try_into().unwrap_or(f64::NAN) };
        let rows = &self.history;

        let time: Vec<String> = rows.iter().map(|r| r.time.to_string()).collect();
        let symbol: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        let side: Vec<&str> = rows.iter().map(|r| r.side.as_str()).collect();
        let spot: Vec<f64> = rows.iter().map(|r| to_f64(r.spot)).collect();
        let bid: Vec<Option<f64>> = rows.iter().map(|r| r.bid.map(to_f64)).collect();
        let ask: Vec<Option<f64>> = rows.iter().map(|r| r.ask.map(to_f64)).collect();
        let vol: Vec<f64> = rows.iter().map(|r| r.vol).collect();
        let theo: Vec<f64> = rows.iter().map(|r| to_f64(r.theoretical)).collect();
        let price: Vec<f64> = rows.iter().map(|r| to_f64(r.price)).collect();
        let source: Vec<&str> = rows.iter().map(|r| r.source.as_str()).collect();

        let mut df = DataFrame::new(vec![
            Series::new("time".into(), time).into(),
            Series::new("symbol".into(), symbol).into(),
            Series::new("side".into(), side).into(),
            Series::new("spot".into(), spot).into(),
            Series::new("bid".into(), bid).into(),
            Series::new("ask".into(), ask).into(),
            Series::new("vol".into(), vol).into(),
            Series::new("theoretical".into(), theo).into(),
            Series::new("price".into(), price).into(),
            Series::new("source".into(), source).into(),
        ])?;

        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;

        let market = rows
            .iter()
            .filter(|r| r.source == PriceSource::Market)
            .count();
        info!(
            "Price matrix: {} fills ({} market, {} theoretical) -> {}",
            rows.len(),
            market,
            rows.len() - market,
            path.display()
        );
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{to_expiration, OptionType, StockBar};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 14)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn contract(strike: Decimal) -> OptionContract {
        let expiry = to_expiration(NaiveDate::from_ymd_opt(2025, 7, 18).unwrap());
        OptionContract::new("SPY", OptionType::Call, expiry, strike)
    }

    fn tick_with(quotes: Vec<OptionQuote>) -> Tick {
        Tick {
            time: now(),
            stock: Some(StockBar {
                time: now(),
                open: dec!(600),
                high: dec!(601),
                low: dec!(599),
                close: dec!(600),
            }),
            options: Arc::new(quotes.into_iter().map(|q| (q.symbol.clone(), q)).collect()),
        }
    }

    fn quote(symbol: &str, bid: Decimal, ask: Decimal) -> OptionQuote {
        OptionQuote {
            symbol: symbol.to_string(),
            time: now(),
            bid,
            ask,
            last: bid,
            implied_volatility: 0.12,
            volume: 5,
        }
    }

    #[test]
    fn test_requires_underlying() {
        let mut pricer = Pricer::new(0.04);
        let result = pricer.market_price_or_theo(&contract(dec!(610)), Side::Sell);
        assert!(matches!(result, Err(PricingError::NoUnderlyingPrice(_))));
    }

    #[test]
    fn test_market_fill_uses_quoted_side() {
        let c = contract(dec!(610));
        let mut pricer = Pricer::new(0.04);
        pricer.val_event(now(), dec!(600));
        pricer.tick_event(&tick_with(vec![quote(&c.occ_symbol(), dec!(0.80), dec!(0.85))]));

        assert_eq!(pricer.market_price_or_theo(&c, Side::Sell).unwrap(), dec!(0.80));
        assert_eq!(pricer.market_price_or_theo(&c, Side::Buy).unwrap(), dec!(0.85));
        assert_eq!(pricer.history().len(), 2);
        assert!(pricer.history().iter().all(|o| o.source == PriceSource::Market));
    }

    #[test]
    fn test_theo_fallback() {
        let c = contract(dec!(610));
        let mut pricer = Pricer::new(0.04);
        pricer.val_event(now(), dec!(600));
        // One-sided quote is not a market
        pricer.tick_event(&tick_with(vec![quote(&c.occ_symbol(), dec!(0), dec!(0.85))]));

        let price = pricer.market_price_or_theo(&c, Side::Sell).unwrap();
        assert_eq!(price, pricer.theoretical_price(&c).unwrap());
        assert!(price > Decimal::ZERO);
        let obs = &pricer.history()[0];
        assert_eq!(obs.source, PriceSource::Theoretical);
        assert_eq!(obs.vol, 0.12);

        // Contract missing from the chain falls back to the moneyness estimate
        let far = contract(dec!(630));
        pricer.market_price_or_theo(&far, Side::Sell).unwrap();
        assert!((pricer.history()[1].vol - estimate_iv(630.0, 600.0)).abs() < 1e-12);
    }

    #[test]
    fn test_write_price_matrix() {
        let c = contract(dec!(610));
        let mut pricer = Pricer::new(0.04);
        pricer.val_event(now(), dec!(600));
        pricer.market_price_or_theo(&c, Side::Sell).unwrap();
        pricer.tick_event(&tick_with(vec![quote(&c.occ_symbol(), dec!(0.80), dec!(0.85))]));
        pricer.market_price_or_theo(&c, Side::Sell).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("prices.csv");
        assert_eq!(pricer.write_price_matrix(&path).unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("time,symbol,side,spot,bid,ask"));
        assert!(lines[1].ends_with("theo"));
        assert!(lines[2].ends_with("market"));
    }
}
