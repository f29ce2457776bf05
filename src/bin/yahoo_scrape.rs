//! Yahoo Finance option chain scraper
//!
//! Appends snapshots of near-dated option chains to
//! `{data_dir}/{SYMBOL}-options.csv`, the format the backtester reads.
//!
//! # Usage
//!
//! ```bash
//! # Single snapshot of the configured symbols
//! yahoo-scrape once
//!
//! # Snapshot every quarter hour during market hours
//! yahoo-scrape --config config/default.toml poll
//!
//! # Override the symbol list
//! yahoo-scrape once --symbols SPY,IWM
//! ```

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use option_backtest::config::{Config, ScraperConfig};
use option_backtest::data::yahoo::{append_snapshot_csv, next_quarter_hour, snapshot_path};
use option_backtest::data::YahooClient;

/// Yahoo option chain scraper CLI.
#[derive(Parser)]
#[command(name = "yahoo-scrape")]
#[command(about = "Snapshot near-dated option chains from Yahoo Finance")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Comma-separated list of symbols, overriding the config
    #[arg(long, global = true)]
    symbols: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a single snapshot now
    Once,

    /// Snapshot on every quarter hour inside the trading window
    Poll,
}

fn local_now(tz: &Tz) -> NaiveDateTime {
    Utc::now().with_timezone(tz).naive_local()
}

/// Snapshot every symbol, stamping all rows with one timestamp.
async fn take_snapshot(
    client: &mut YahooClient,
    scraper: &ScraperConfig,
    config: &Config,
    tz: &Tz,
) -> Result<usize> {
    let timestamp = Utc::now().timestamp();
    let today = local_now(tz).date();

    let pb = ProgressBar::new(scraper.symbols.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut total = 0;
    for symbol in &scraper.symbols {
        pb.set_message(symbol.clone());
        let rows = client
            .snapshot(symbol, today, timestamp, scraper.dte_range)
            .await
            .with_context(|| format!("Failed to fetch {} option chains", symbol))?;

        let path = snapshot_path(&config.paths.data_dir, symbol);
        let written = append_snapshot_csv(&path, &rows)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("{}: appended {} rows to {}", symbol, written, path.display());

        total += written;
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Snapshot at {} done: {} rows, {} requests so far",
        timestamp,
        total,
        client.request_count()
    );
    Ok(total)
}

async fn cmd_poll(
    client: &mut YahooClient,
    scraper: &ScraperConfig,
    config: &Config,
    tz: &Tz,
) -> Result<()> {
    let window = scraper.window();
    info!(
        "Polling {:?} on weekdays {} to {} ({})",
        scraper.symbols, window.open, window.close, tz
    );

    take_snapshot(client, scraper, config, tz).await?;

    loop {
        let now = local_now(tz);
        let wake = next_quarter_hour(now);
        let wait = (wake - now).to_std().unwrap_or(Duration::ZERO);
        info!("Sleeping until {}", wake);
        tokio::time::sleep(wait).await;

        let now = local_now(tz);
        match window.skip_reason(now) {
            Some(reason) => info!("{}, skipping snapshot at {}", reason, now),
            None => {
                take_snapshot(client, scraper, config, tz).await?;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("option_backtest=info".parse()?)
                .add_directive("yahoo_scrape=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref()).context("Invalid configuration")?;
    let tz = config.timezone()?;

    let mut scraper = config.scraper.clone();
    if let Some(symbols) = cli.symbols {
        scraper.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    fs::create_dir_all(&config.paths.data_dir)?;
    let mut client = YahooClient::new()?;

    match cli.command {
        Commands::Once => {
            take_snapshot(&mut client, &scraper, &config, &tz).await?;
        }
        Commands::Poll => cmd_poll(&mut client, &scraper, &config, &tz).await?,
    }

    Ok(())
}
