//! Market data loader for stock bar and option snapshot CSV files.
//!
//! The stock file holds one row per intraday bar:
//! - time (unix seconds), open, high, low, close
//!
//! The option file holds one row per contract per snapshot, as appended by
//! the Yahoo scraper:
//! - timestamp (unix seconds), contractSymbol, bid, ask, lastPrice,
//!   impliedVolatility, volume
//!
//! Both are replayed as a single stream of [`Tick`]s ordered by time.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use polars::prelude::*;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use super::types::{OptionChain, OptionQuote, StockBar, Tick};

/// Expected columns in the stock bar file.
pub const STOCK_COLUMNS: &[&str] = &["time", "open", "high", "low", "close"];

/// Expected columns in the option snapshot file.
pub const OPTION_COLUMNS: &[&str] = &[
    "timestamp",
    "contractSymbol",
    "bid",
    "ask",
    "lastPrice",
    "impliedVolatility",
    "volume",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert unix seconds to naive exchange-local time.
pub fn local_time(tz: &Tz, unix_secs: i64) -> Option<NaiveDateTime> {
    tz.timestamp_opt(unix_secs, 0)
        .single()
        .map(|dt| dt.naive_local())
}

fn to_decimal(value: f64, field: &str, row: usize) -> Result<Decimal, LoaderError> {
    Decimal::try_from(value)
        .map_err(|e| LoaderError::InvalidData(format!("{} at row {}: {}", field, row, e)))
}

fn missing(field: &str, row: usize) -> LoaderError {
    LoaderError::InvalidData(format!("missing {} at row {}", field, row))
}

fn scan_csv(path: &Path, required: &[&str]) -> Result<LazyFrame, LoaderError> {
    if !path.exists() {
        return Err(LoaderError::FileNotFound(path.display().to_string()));
    }
    let mut lf = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(None)
        .finish()?;

    let schema = lf.collect_schema()?;
    for column in required {
        if schema.get(column).is_none() {
            return Err(LoaderError::InvalidData(format!(
                "{}: missing column {}",
                path.display(),
                column
            )));
        }
    }
    Ok(lf)
}

/// Load all stock bars from a CSV file, sorted by time.
pub fn load_stock_bars(path: &Path, tz: &Tz) -> Result<Vec<StockBar>, LoaderError> {
    let df = scan_csv(path, STOCK_COLUMNS)?
        .select([
            col("time").cast(DataType::Int64),
            col("open").cast(DataType::Float64),
            col("high").cast(DataType::Float64),
            col("low").cast(DataType::Float64),
            col("close").cast(DataType::Float64),
        ])
        .collect()?;

    let time_col = df.column("time")?.i64()?;
    let open_col = df.column("open")?.f64()?;
    let high_col = df.column("high")?.f64()?;
    let low_col = df.column("low")?.f64()?;
    let close_col = df.column("close")?.f64()?;

    let mut bars = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let ts = time_col.get(idx).ok_or_else(|| missing("time", idx))?;
        let time = local_time(tz, ts)
            .ok_or_else(|| LoaderError::InvalidData(format!("bad timestamp {} at row {}", ts, idx)))?;
        let open = open_col.get(idx).ok_or_else(|| missing("open", idx))?;
        let high = high_col.get(idx).ok_or_else(|| missing("high", idx))?;
        let low = low_col.get(idx).ok_or_else(|| missing("low", idx))?;
        let close = close_col.get(idx).ok_or_else(|| missing("close", idx))?;

        bars.push(StockBar {
            time,
            open: to_decimal(open, "open", idx)?,
            high: to_decimal(high, "high", idx)?,
            low: to_decimal(low, "low", idx)?,
            close: to_decimal(close, "close", idx)?,
        });
    }
    bars.sort_by_key(|b| b.time);

    info!("Loaded {} stock bars from {}", bars.len(), path.display());
    Ok(bars)
}

/// Load option snapshots from a CSV file, grouped into chains by timestamp.
///
/// Missing quote fields (no bid, no volume, ...) are read as zero; a missing
/// timestamp or contract symbol is an error.
pub fn load_option_chains(
    path: &Path,
    tz: &Tz,
) -> Result<Vec<(NaiveDateTime, Arc<OptionChain>)>, LoaderError> {
    let df = scan_csv(path, OPTION_COLUMNS)?
        .select([
            col("timestamp").cast(DataType::Int64),
            col("contractSymbol").cast(DataType::String),
            col("bid").cast(DataType::Float64).fill_null(lit(0.0)),
            col("ask").cast(DataType::Float64).fill_null(lit(0.0)),
            col("lastPrice").cast(DataType::Float64).fill_null(lit(0.0)),
            col("impliedVolatility").cast(DataType::Float64).fill_null(lit(0.0)),
            col("volume").cast(DataType::Float64).fill_null(lit(0.0)),
        ])
        .collect()?;

    let ts_col = df.column("timestamp")?.i64()?;
    let symbol_col = df.column("contractSymbol")?.str()?;
    let bid_col = df.column("bid")?.f64()?;
    let ask_col = df.column("ask")?.f64()?;
    let last_col = df.column("lastPrice")?.f64()?;
    let iv_col = df.column("impliedVolatility")?.f64()?;
    let volume_col = df.column("volume")?.f64()?;

    let mut chains: BTreeMap<i64, OptionChain> = BTreeMap::new();
    for idx in 0..df.height() {
        let ts = ts_col.get(idx).ok_or_else(|| missing("timestamp", idx))?;
        let time = local_time(tz, ts)
            .ok_or_else(|| LoaderError::InvalidData(format!("bad timestamp {} at row {}", ts, idx)))?;
        let symbol = symbol_col
            .get(idx)
            .ok_or_else(|| missing("contractSymbol", idx))?
            .to_string();

        let quote = OptionQuote {
            symbol: symbol.clone(),
            time,
            bid: to_decimal(bid_col.get(idx).unwrap_or(0.0), "bid", idx)?,
            ask: to_decimal(ask_col.get(idx).unwrap_or(0.0), "ask", idx)?,
            last: to_decimal(last_col.get(idx).unwrap_or(0.0), "lastPrice", idx)?,
            implied_volatility: iv_col.get(idx).unwrap_or(0.0),
            volume: volume_col.get(idx).unwrap_or(0.0) as i64,
        };
        chains.entry(ts).or_default().insert(symbol, quote);
    }

    let mut result = Vec::with_capacity(chains.len());
    for (ts, chain) in chains {
        let time = local_time(tz, ts)
            .ok_or_else(|| LoaderError::InvalidData(format!("bad timestamp {}", ts)))?;
        result.push((time, Arc::new(chain)));
    }

    info!(
        "Loaded {} option snapshots ({} quotes) from {}",
        result.len(),
        df.height(),
        path.display()
    );
    Ok(result)
}

/// Replays stock bars and option chains as one time-ordered tick stream.
#[derive(Debug, Clone)]
pub struct MarketDataLoader {
    bars: Vec<StockBar>,
    chains: Vec<(NaiveDateTime, Arc<OptionChain>)>,
    next_bar: usize,
    next_chain: usize,
    latest_stock: Option<StockBar>,
    latest_options: Arc<OptionChain>,
    last_time: Option<NaiveDateTime>,
    tick_count: usize,
}

impl MarketDataLoader {
    /// Load market data from CSV files.
    ///
    /// Without an option file the ticks carry an empty chain and every
    /// option is priced theoretically.
    pub fn from_csv(
        stock_path: &Path,
        option_path: Option<&Path>,
        tz: &Tz,
    ) -> Result<Self, LoaderError> {
        let bars = load_stock_bars(stock_path, tz)?;
        let chains = match option_path {
            Some(path) => load_option_chains(path, tz)?,
            None => Vec::new(),
        };
        Ok(Self::in_memory(bars, chains))
    }

    /// Create a loader over pre-loaded data.
    pub fn in_memory(bars: Vec<StockBar>, chains: Vec<(NaiveDateTime, Arc<OptionChain>)>) -> Self {
        Self {
            bars,
            chains,
            next_bar: 0,
            next_chain: 0,
            latest_stock: None,
            latest_options: Arc::new(OptionChain::new()),
            last_time: None,
            tick_count: 0,
        }
    }

    /// Restart the replay from the first tick.
    pub fn rewind(&mut self) {
        self.next_bar = 0;
        self.next_chain = 0;
        self.latest_stock = None;
        self.latest_options = Arc::new(OptionChain::new());
        self.last_time = None;
        self.tick_count = 0;
    }

    fn peek_time(&self) -> Option<NaiveDateTime> {
        let bar_time = self.bars.get(self.next_bar).map(|b| b.time);
        let chain_time = self.chains.get(self.next_chain).map(|(t, _)| *t);
        match (bar_time, chain_time) {
            (Some(b), Some(c)) => Some(b.min(c)),
            (b, c) => b.or(c),
        }
    }

    pub fn has_next_tick(&self) -> bool {
        self.peek_time().is_some()
    }

    /// Advance to the earlier of the next stock bar and the next option chain.
    pub fn next_tick(&mut self) -> Option<Tick> {
        let current_time = self.peek_time()?;

        if let Some(bar) = self.bars.get(self.next_bar) {
            if bar.time == current_time {
                self.latest_stock = Some(bar.clone());
                self.next_bar += 1;
            }
        }

        if let Some((time, chain)) = self.chains.get(self.next_chain) {
            if *time == current_time {
                self.latest_options = Arc::clone(chain);
                self.next_chain += 1;
            }
        }

        self.last_time = Some(current_time);
        self.tick_count += 1;
        debug!("tick {} at {}", self.tick_count, current_time);

        Some(Tick {
            time: current_time,
            stock: self.latest_stock.clone(),
            options: Arc::clone(&self.latest_options),
        })
    }

    /// Whether the last emitted tick closed its trading day.
    pub fn is_end_of_day(&self) -> bool {
        match (self.last_time, self.peek_time()) {
            (Some(last), Some(next)) => last.date() != next.date(),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Number of ticks emitted so far.
    pub fn tick_count(&self) -> usize {
        self.tick_count
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.chains.len()
    }
}

impl Iterator for MarketDataLoader {
    type Item = Tick;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn bar(time: NaiveDateTime, open: Decimal) -> StockBar {
        StockBar {
            time,
            open,
            high: open + dec!(1),
            low: open - dec!(1),
            close: open,
        }
    }

    fn chain(time: NaiveDateTime, symbols: &[&str]) -> (NaiveDateTime, Arc<OptionChain>) {
        let chain = symbols
            .iter()
            .map(|s| {
                (
                    s.to_string(),
                    OptionQuote {
                        symbol: s.to_string(),
                        time,
                        bid: dec!(1),
                        ask: dec!(1.1),
                        last: dec!(1.05),
                        implied_volatility: 0.15,
                        volume: 1,
                    },
                )
            })
            .collect();
        (time, Arc::new(chain))
    }

    #[test]
    fn test_local_time() {
        let tz: Tz = "America/Chicago".parse().unwrap();
        // 2025-07-01 14:30 UTC = 09:30 CDT
        let time = local_time(&tz, 1_751_380_200).unwrap();
        assert_eq!(time, dt(1, 9, 30));
    }

    #[test]
    fn test_merge_order() {
        let bars = vec![bar(dt(1, 9, 30), dec!(600)), bar(dt(1, 9, 45), dec!(601))];
        let chains = vec![
            chain(dt(1, 9, 15), &["A"]),
            chain(dt(1, 9, 45), &["A", "B"]),
        ];
        let mut md = MarketDataLoader::in_memory(bars, chains);

        // Options-only tick before any stock bar
        let t1 = md.next_tick().unwrap();
        assert_eq!(t1.time, dt(1, 9, 15));
        assert!(t1.stock.is_none());
        assert_eq!(t1.options.len(), 1);

        // Stock-only tick keeps the previous chain
        let t2 = md.next_tick().unwrap();
        assert_eq!(t2.time, dt(1, 9, 30));
        assert_eq!(t2.stock.as_ref().unwrap().open, dec!(600));
        assert_eq!(t2.options.len(), 1);

        // Both sources advance on a shared timestamp
        let t3 = md.next_tick().unwrap();
        assert_eq!(t3.time, dt(1, 9, 45));
        assert_eq!(t3.stock.as_ref().unwrap().open, dec!(601));
        assert_eq!(t3.options.len(), 2);

        assert!(!md.has_next_tick());
        assert!(md.next_tick().is_none());
        assert_eq!(md.tick_count(), 3);
    }

    #[test]
    fn test_end_of_day() {
        let bars = vec![
            bar(dt(1, 9, 30), dec!(600)),
            bar(dt(1, 15, 0), dec!(601)),
            bar(dt(2, 9, 30), dec!(602)),
        ];
        let mut md = MarketDataLoader::in_memory(bars, vec![]);
        assert!(!md.is_end_of_day());

        md.next_tick();
        assert!(!md.is_end_of_day());
        md.next_tick();
        assert!(md.is_end_of_day());
        md.next_tick();
        assert!(md.is_end_of_day());
    }

    #[test]
    fn test_rewind() {
        let bars = vec![bar(dt(1, 9, 30), dec!(600)), bar(dt(1, 9, 45), dec!(601))];
        let mut md = MarketDataLoader::in_memory(bars, vec![chain(dt(1, 9, 30), &["A"])]);
        assert_eq!(md.by_ref().count(), 2);

        md.rewind();
        assert_eq!(md.tick_count(), 0);
        let tick = md.next_tick().unwrap();
        assert_eq!(tick.time, dt(1, 9, 30));
        assert_eq!(tick.options.len(), 1);
    }

    #[test]
    fn test_load_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        let stock_path = dir.path().join("SPY.csv");
        let option_path = dir.path().join("SPY-options.csv");

        let mut f = std::fs::File::create(&stock_path).unwrap();
        writeln!(f, "time,open,high,low,close").unwrap();
        writeln!(f, "1751380200,600.5,601.0,600.0,600.75").unwrap();
        writeln!(f, "1751381100,600.75,602.0,600.5,601.5").unwrap();

        let mut f = std::fs::File::create(&option_path).unwrap();
        writeln!(
            f,
            "timestamp,contractSymbol,bid,ask,lastPrice,impliedVolatility,volume"
        )
        .unwrap();
        writeln!(f, "1751380200,SPY250701C00605000,0.5,0.55,0.52,0.11,120.0").unwrap();
        writeln!(f, "1751380200,SPY250701P00595000,0.4,0.45,0.41,0.13,").unwrap();
        writeln!(f, "1751381100,SPY250701C00605000,0.6,0.65,0.62,0.11,130.0").unwrap();

        let tz: Tz = "America/Chicago".parse().unwrap();
        let mut md = MarketDataLoader::from_csv(&stock_path, Some(&option_path), &tz).unwrap();
        assert_eq!(md.bar_count(), 2);
        assert_eq!(md.snapshot_count(), 2);

        let tick = md.next_tick().unwrap();
        assert_eq!(tick.time, dt(1, 9, 30));
        assert_eq!(tick.stock.as_ref().unwrap().close, dec!(600.75));
        assert_eq!(tick.options.len(), 2);
        let put = &tick.options["SPY250701P00595000"];
        assert_eq!(put.volume, 0);
        assert_eq!(put.bid, dec!(0.4));

        let tick = md.next_tick().unwrap();
        assert_eq!(tick.options["SPY250701C00605000"].volume, 130);
        assert!(md.is_end_of_day());
    }

    #[test]
    fn test_missing_file() {
        let tz: Tz = "America/Chicago".parse().unwrap();
        let result = load_stock_bars(Path::new("does/not/exist.csv"), &tz);
        assert!(matches!(result, Err(LoaderError::FileNotFound(_))));
    }

    #[test]
    fn test_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.csv");
        std::fs::write(&path, "time,open,high,low\n1751380200,1,2,0.5\n").unwrap();

        let tz: Tz = "America/Chicago".parse().unwrap();
        let result = load_stock_bars(&path, &tz);
        assert!(matches!(result, Err(LoaderError::InvalidData(msg)) if msg.contains("close")));
    }
}
