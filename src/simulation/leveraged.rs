//! Monte Carlo distribution of a daily-rebalanced leveraged ETF.
//!
//! The index follows a driftless lognormal walk with daily volatility
//! `σ / √252`. A fund rebalanced daily to `L`x leverage compounds
//! `exp(L · r)` per day, so its terminal distribution is wider than a simple
//! `L`x scaling of the index move suggests.

use indicatif::ProgressBar;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ticker shown on charts
    pub symbol: String,
    pub start_price: f64,
    /// Annualized volatility of the underlying index
    pub index_vol: f64,
    /// Trading days simulated forward
    pub days: usize,
    pub paths: usize,
    pub leverage: f64,
    pub seed: u64,
    /// Histogram bins for the CDF chart
    pub bins: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            symbol: "TQQQ".to_string(),
            start_price: 75.6,
            index_vol: 0.18,
            days: 15,
            paths: 10_000,
            leverage: 3.0,
            seed: 42,
            bins: 100,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.start_price > 0.0) {
            return Err(SimulationError::InvalidParameter(format!(
                "start_price must be positive, got {}",
                self.start_price
            )));
        }
        if !(self.index_vol >= 0.0) {
            return Err(SimulationError::InvalidParameter(format!(
                "index_vol must be non-negative, got {}",
                self.index_vol
            )));
        }
        if self.days == 0 || self.paths == 0 {
            return Err(SimulationError::InvalidParameter(
                "days and paths must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal prices of every simulated path.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub config: SimulationConfig,
    /// Terminal prices, sorted ascending
    pub prices: Vec<f64>,
}

/// Simulate terminal prices of a leveraged fund.
pub fn simulate_leveraged_prices(config: &SimulationConfig) -> Result<SimulationResult, SimulationError> {
    simulate_with_progress(config, &ProgressBar::hidden())
}

/// Simulate terminal prices, advancing `progress` once per path.
///
/// Each path draws from its own ChaCha8 stream derived from `seed`, so the
/// result does not depend on how rayon schedules the paths.
pub fn simulate_with_progress(
    config: &SimulationConfig,
    progress: &ProgressBar,
) -> Result<SimulationResult, SimulationError> {
    config.validate()?;

    let daily_vol = config.index_vol / TRADING_DAYS_PER_YEAR.sqrt();
    info!(
        "Simulating {} paths of {} over {} days ({}x, index vol {:.1}%)",
        config.paths,
        config.symbol,
        config.days,
        config.leverage,
        config.index_vol * 100.0
    );
    debug!("Daily index vol: {:.6}", daily_vol);

    let mut prices: Vec<f64> = (0..config.paths)
        .into_par_iter()
        .map(|path| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            rng.set_stream(path as u64);

            let mut price = config.start_price;
            for _ in 0..config.days {
                let z: f64 = Distribution::<f64>::sample(&StandardNormal, &mut rng);
                let index_return = z * daily_vol;
                price *= (config.leverage * index_return).exp();
            }

            progress.inc(1);
            price
        })
        .collect();

    prices.sort_by(|a, b| a.total_cmp(b));

    Ok(SimulationResult {
        config: config.clone(),
        prices,
    })
}

/// Annualized volatility implied by terminal prices after `days` days.
///
/// Population standard deviation of `ln(p / start)`, scaled by `√(252 / days)`.
pub fn annualized_volatility(prices: &[f64], start_price: f64, days: usize) -> f64 {
    if prices.is_empty() || days == 0 || start_price <= 0.0 {
        return 0.0;
    }
    let log_returns: Vec<f64> = prices.iter().map(|p| (p / start_price).ln()).collect();
    let n = log_returns.len() as f64;
    let mean = log_returns.iter().sum::<f64>() / n;
    let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() * (TRADING_DAYS_PER_YEAR / days as f64).sqrt()
}

impl SimulationResult {
    pub fn annualized_volatility(&self) -> f64 {
        annualized_volatility(&self.prices, self.config.start_price, self.config.days)
    }

    /// Fraction of paths ending at or below `price`.
    pub fn probability_below(&self, price: f64) -> f64 {
        if self.prices.is_empty() {
            return 0.0;
        }
        let count = self.prices.partition_point(|p| *p <= price);
        count as f64 / self.prices.len() as f64
    }

    /// Price below which a fraction `q` of paths end.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.prices.is_empty() {
            return None;
        }
        let idx = (q.clamp(0.0, 1.0) * (self.prices.len() - 1) as f64).round() as usize;
        self.prices.get(idx).copied()
    }

    /// Cumulative histogram: right bin edge and fraction of paths at or below it.
    pub fn cumulative_histogram(&self, bins: usize) -> Vec<(f64, f64)> {
        let (Some(&min), Some(&max)) = (self.prices.first(), self.prices.last()) else {
            return Vec::new();
        };
        let bins = bins.max(1);
        let width = (max - min) / bins as f64;
        if width <= 0.0 {
            return vec![(max, 1.0)];
        }

        let n = self.prices.len() as f64;
        (1..=bins)
            .map(|i| {
                let edge = if i == bins { max } else { min + width * i as f64 };
                (edge, self.prices.partition_point(|p| *p <= edge) as f64 / n)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulationConfig {
        SimulationConfig {
            paths: 4_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.start_price, 75.6);
        assert_eq!(config.index_vol, 0.18);
        assert_eq!(config.days, 15);
        assert_eq!(config.paths, 10_000);
        assert_eq!(config.leverage, 3.0);
    }

    #[test]
    fn test_deterministic_per_seed() {
        let a = simulate_leveraged_prices(&small()).unwrap();
        let b = simulate_leveraged_prices(&small()).unwrap();
        assert_eq!(a.prices, b.prices);

        let c = simulate_leveraged_prices(&SimulationConfig { seed: 7, ..small() }).unwrap();
        assert_ne!(a.prices, c.prices);
    }

    #[test]
    fn test_vol_scales_with_leverage() {
        let result = simulate_leveraged_prices(&small()).unwrap();
        let vol = result.annualized_volatility();
        // 3 x 18% within sampling error
        assert!((vol - 0.54).abs() < 0.03, "vol = {}", vol);
        assert!(result.prices.iter().all(|p| *p > 0.0));
    }

    #[test]
    fn test_zero_vol_is_flat() {
        let config = SimulationConfig {
            index_vol: 0.0,
            paths: 10,
            ..Default::default()
        };
        let result = simulate_leveraged_prices(&config).unwrap();
        assert!(result.prices.iter().all(|p| (*p - 75.6).abs() < 1e-12));
        assert_eq!(result.annualized_volatility(), 0.0);
        assert_eq!(result.cumulative_histogram(10), vec![(75.6, 1.0)]);
    }

    #[test]
    fn test_annualized_volatility() {
        // Log returns of +10% and -10%: population std = 0.1
        let prices = [100.0 * 0.1_f64.exp(), 100.0 * (-0.1_f64).exp()];
        let vol = annualized_volatility(&prices, 100.0, 63);
        assert!((vol - 0.2).abs() < 1e-12);
        assert_eq!(annualized_volatility(&[], 100.0, 10), 0.0);
    }

    #[test]
    fn test_cdf_helpers() {
        let result = SimulationResult {
            config: SimulationConfig::default(),
            prices: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert_eq!(result.probability_below(2.5), 0.5);
        assert_eq!(result.probability_below(0.5), 0.0);
        assert_eq!(result.quantile(0.0), Some(1.0));
        assert_eq!(result.quantile(1.0), Some(4.0));

        let hist = result.cumulative_histogram(3);
        assert_eq!(hist.len(), 3);
        assert_eq!(hist[0], (2.0, 0.5));
        assert_eq!(hist[2], (4.0, 1.0));
    }

    #[test]
    fn test_invalid_parameters() {
        let config = SimulationConfig {
            paths: 0,
            ..Default::default()
        };
        assert!(simulate_leveraged_prices(&config).is_err());
        let config = SimulationConfig {
            start_price: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
