//! Yahoo Finance client for option chain snapshots.
//!
//! Uses Yahoo Finance's unofficial options endpoint. Data is delayed and
//! intended for personal research use.
//!
//! Snapshots are appended to `{data_dir}/{SYMBOL}-options.csv` in the layout
//! read back by [`super::loader::load_option_chains`].

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Weekday};
use polars::prelude::*;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::loader::OPTION_COLUMNS;

/// Yahoo Finance options API base URL.
const BASE_URL: &str = "https://query1.finance.yahoo.com/v7/finance";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Minimum interval between requests.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);

/// Bytes of an unparseable body quoted in the error.
const BODY_EXCERPT_LEN: usize = 200;

/// Yahoo API errors.
#[derive(Error, Debug)]
pub enum YahooError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("No option data returned for {0}")]
    NoData(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct YahooOptionsResponse {
    #[serde(rename = "optionChain")]
    option_chain: YahooOptionChain,
}

#[derive(Debug, Deserialize)]
struct YahooOptionChain {
    result: Vec<YahooOptionChainData>,
}

#[derive(Debug, Deserialize)]
struct YahooOptionChainData {
    #[serde(rename = "expirationDates", default)]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<YahooOptions>,
}

#[derive(Debug, Deserialize)]
struct YahooOptions {
    #[serde(default)]
    calls: Vec<YahooOptionData>,
    #[serde(default)]
    puts: Vec<YahooOptionData>,
}

#[derive(Debug, Deserialize)]
struct YahooOptionData {
    #[serde(rename = "contractSymbol")]
    contract_symbol: String,
    bid: Option<f64>,
    ask: Option<f64>,
    #[serde(rename = "lastPrice")]
    last_price: Option<f64>,
    #[serde(rename = "impliedVolatility")]
    implied_volatility: Option<f64>,
    volume: Option<i64>,
}

/// One contract row of a chain snapshot, as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub timestamp: i64,
    pub contract_symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last_price: f64,
    pub implied_volatility: f64,
    pub volume: i64,
}

impl SnapshotRow {
    fn from_api(data: YahooOptionData, timestamp: i64) -> Self {
        Self {
            timestamp,
            contract_symbol: data.contract_symbol,
            bid: data.bid.unwrap_or(0.0),
            ask: data.ask.unwrap_or(0.0),
            last_price: data.last_price.unwrap_or(0.0),
            implied_volatility: data.implied_volatility.unwrap_or(0.0),
            volume: data.volume.unwrap_or(0),
        }
    }
}

/// Yahoo Finance API client.
pub struct YahooClient {
    client: Client,
    last_request: Instant,
    request_count: u64,
}

impl YahooClient {
    pub fn new() -> Result<Self, YahooError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            last_request: Instant::now() - MIN_REQUEST_INTERVAL,
            request_count: 0,
        })
    }

    /// Rate-limited request helper.
    async fn request(
        &mut self,
        symbol: &str,
        params: &[(&str, String)],
    ) -> Result<YahooOptionChainData, YahooError> {
        let elapsed = self.last_request.elapsed();
        if elapsed < MIN_REQUEST_INTERVAL {
            tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
        }

        let url = format!("{}/options/{}", BASE_URL, symbol);
        let response = self.client.get(&url).query(params).send().await?;

        self.last_request = Instant::now();
        self.request_count += 1;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(YahooError::ApiError(format!("{}: {}", status, text)));
        }

        let text = response.text().await?;
        parse_options_response(symbol, &text)
    }

    /// Get request count for monitoring.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Get listed option expiration dates.
    pub async fn get_expirations(&mut self, symbol: &str) -> Result<Vec<NaiveDate>, YahooError> {
        let data = self.request(symbol, &[]).await?;
        Ok(data
            .expiration_dates
            .iter()
            .filter_map(|&ts| DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()))
            .collect())
    }

    /// Get calls and puts for one expiration, stamped with `timestamp`.
    pub async fn get_option_chain(
        &mut self,
        symbol: &str,
        expiry: NaiveDate,
        timestamp: i64,
    ) -> Result<Vec<SnapshotRow>, YahooError> {
        // Yahoo keys expirations by midnight UTC of the expiry date
        let expiry_ts = expiry
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or_default();
        let data = self
            .request(symbol, &[("date", expiry_ts.to_string())])
            .await?;

        let mut rows = Vec::new();
        for options in data.options {
            rows.extend(
                options
                    .calls
                    .into_iter()
                    .chain(options.puts)
                    .map(|o| SnapshotRow::from_api(o, timestamp)),
            );
        }
        debug!("{} {}: {} contracts", symbol, expiry, rows.len());
        Ok(rows)
    }

    /// Snapshot every chain expiring within `dte_range` days of `today`.
    pub async fn snapshot(
        &mut self,
        symbol: &str,
        today: NaiveDate,
        timestamp: i64,
        dte_range: i64,
    ) -> Result<Vec<SnapshotRow>, YahooError> {
        let expirations = expirations_within(&self.get_expirations(symbol).await?, today, dte_range);
        info!(
            "Fetching data for {} {} expirations: {:?}",
            expirations.len(),
            symbol,
            expirations
        );

        let mut rows = Vec::new();
        for expiry in expirations {
            rows.extend(self.get_option_chain(symbol, expiry, timestamp).await?);
        }
        Ok(rows)
    }
}

/// Decode an options endpoint body into its first result.
fn parse_options_response(symbol: &str, text: &str) -> Result<YahooOptionChainData, YahooError> {
    let body: YahooOptionsResponse = serde_json::from_str(text).map_err(|e| {
        let mut end = text.len().min(BODY_EXCERPT_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        YahooError::InvalidResponse(format!("{} in body: {}", e, &text[..end]))
    })?;

    body.option_chain
        .result
        .into_iter()
        .next()
        .ok_or_else(|| YahooError::NoData(symbol.to_string()))
}

/// Expirations between today and `dte_range` days out, inclusive.
pub fn expirations_within(expirations: &[NaiveDate], today: NaiveDate, dte_range: i64) -> Vec<NaiveDate> {
    expirations
        .iter()
        .copied()
        .filter(|d| {
            let dte = (*d - today).num_days();
            (0..=dte_range).contains(&dte)
        })
        .collect()
}

/// Path of the snapshot file for a symbol.
pub fn snapshot_path(data_dir: &Path, symbol: &str) -> PathBuf {
    data_dir.join(format!("{}-options.csv", symbol))
}

/// Append snapshot rows to a CSV file, writing the header only for a new file.
///
/// Returns the number of rows written.
pub fn append_snapshot_csv(path: &Path, rows: &[SnapshotRow]) -> Result<usize, YahooError> {
    if rows.is_empty() {
        return Ok(0);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let timestamp: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    let symbol: Vec<&str> = rows.iter().map(|r| r.contract_symbol.as_str()).collect();
    let bid: Vec<f64> = rows.iter().map(|r| r.bid).collect();
    let ask: Vec<f64> = rows.iter().map(|r| r.ask).collect();
    let last: Vec<f64> = rows.iter().map(|r| r.last_price).collect();
    let iv: Vec<f64> = rows.iter().map(|r| r.implied_volatility).collect();
    let volume: Vec<i64> = rows.iter().map(|r| r.volume).collect();

    let mut df = DataFrame::new(vec![
        Series::new(OPTION_COLUMNS[0].into(), timestamp).into(),
        Series::new(OPTION_COLUMNS[1].into(), symbol).into(),
        Series::new(OPTION_COLUMNS[2].into(), bid).into(),
        Series::new(OPTION_COLUMNS[3].into(), ask).into(),
        Series::new(OPTION_COLUMNS[4].into(), last).into(),
        Series::new(OPTION_COLUMNS[5].into(), iv).into(),
        Series::new(OPTION_COLUMNS[6].into(), volume).into(),
    ])?;

    let file_exists = path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    CsvWriter::new(&mut file)
        .include_header(!file_exists)
        .finish(&mut df)?;

    Ok(rows.len())
}

/// Weekday polling window in exchange-local time.
#[derive(Debug, Clone, Copy)]
pub struct PollWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl PollWindow {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    /// Whether `now` falls on a weekday inside the window (inclusive).
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let weekday = now.weekday();
        let is_weekday = weekday != Weekday::Sat && weekday != Weekday::Sun;
        is_weekday && now.time() >= self.open && now.time() <= self.close
    }

    /// Why a poll at `now` is skipped, or `None` inside the window.
    pub fn skip_reason(&self, now: NaiveDateTime) -> Option<&'static str> {
        match now.weekday() {
            Weekday::Sat | Weekday::Sun => Some("Weekend"),
            _ if !self.contains(now) => Some("Outside active hours"),
            _ => None,
        }
    }
}

/// The next quarter-hour boundary (:00, :15, :30, :45) strictly after `now`.
pub fn next_quarter_hour(now: NaiveDateTime) -> NaiveDateTime {
    let floored = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .and_then(|t| t.with_minute(now.minute() / 15 * 15))
        .unwrap_or(now);
    floored + TimeDelta::minutes(15)
}
