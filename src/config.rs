//! Run configuration loaded from TOML.
//!
//! Every section falls back to its defaults, so a file only needs the keys it
//! changes. With no file at all, [`Config::default`] reproduces the stock
//! setup: the July 2025 SPY data in `data/`, output in `tmp/`, the five
//! comparison strategies and the TQQQ simulation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::backtest::{BacktestConfig, StrategyConfig};
use crate::data::PollWindow;
use crate::simulation::SimulationConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown time zone: {0}")]
    Timezone(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Input and output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory the scraper appends option snapshots to
    pub data_dir: PathBuf,
    /// Directory for charts, journals and the price matrix
    pub output_dir: PathBuf,
    /// Intraday stock bars
    pub stock_csv: PathBuf,
    /// Option chain snapshots; backtests fall back to theoretical prices without it
    pub options_csv: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("tmp"),
            stock_csv: PathBuf::from("data/SPY-202507-15min.csv"),
            options_csv: Some(PathBuf::from("data/SPY-options.csv")),
        }
    }
}

/// Market calendar settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// IANA zone that timestamps are converted into
    pub timezone: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Chicago".to_string(),
        }
    }
}

/// Option chain scraper settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub symbols: Vec<String>,
    /// Keep expirations at most this many days out
    pub dte_range: i64,
    /// Polling window, exchange-local
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SPY".to_string(), "QQQ".to_string()],
            dte_range: 7,
            open: NaiveTime::from_hms_opt(8, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(15, 15, 0).unwrap_or_default(),
        }
    }
}

impl ScraperConfig {
    pub fn window(&self) -> PollWindow {
        PollWindow::new(self.open, self.close)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub market: MarketConfig,
    pub backtest: BacktestConfig,
    pub strategies: Vec<StrategyConfig>,
    pub simulation: SimulationConfig,
    pub scraper: ScraperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            market: MarketConfig::default(),
            backtest: BacktestConfig::default(),
            strategies: StrategyConfig::defaults(),
            simulation: SimulationConfig::default(),
            scraper: ScraperConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.market
            .timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Timezone(format!("{} ({})", self.market.timezone, e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;

        let mut names = std::collections::HashSet::new();
        for strategy in &self.strategies {
            if !names.insert(strategy.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate strategy name '{}'",
                    strategy.name
                )));
            }
            if strategy.cash <= rust_decimal::Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "strategy '{}' needs positive cash",
                    strategy.name
                )));
            }
        }

        self.simulation
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.scraper.open >= self.scraper.close {
            return Err(ConfigError::Invalid(
                "scraper open must be before close".to_string(),
            ));
        }
        Ok(())
    }
}
