//! option-backtest CLI
//!
//! # Usage
//!
//! ```bash
//! # Compare the configured strategies on historical data
//! option-backtest backtest --config config/default.toml
//!
//! # Leveraged ETF price distribution
//! option-backtest simulate --paths 20000 --seed 7
//!
//! # Print the merged stock/option tick stream
//! option-backtest replay
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use option_backtest::backtest::{BacktestEngine, BacktestResult};
use option_backtest::chart::{plot_cdf, plot_time_series, Series};
use option_backtest::config::Config;
use option_backtest::data::MarketDataLoader;
use option_backtest::simulation::simulate_with_progress;

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "option-backtest")]
#[command(about = "Backtest option-selling strategies and simulate leveraged ETFs")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults apply without one)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured strategy over the market data
    Backtest {
        /// Only run the strategy with this name
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Monte Carlo distribution of a leveraged ETF
    Simulate {
        /// Number of simulated paths
        #[arg(long)]
        paths: Option<usize>,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the merged tick stream: time, stock open, option count
    Replay,
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn load_market(config: &Config) -> Result<MarketDataLoader> {
    let tz = config.timezone()?;
    let paths = &config.paths;
    MarketDataLoader::from_csv(&paths.stock_csv, paths.options_csv.as_deref(), &tz)
        .with_context(|| format!("Failed to load market data from {}", paths.stock_csv.display()))
}

fn save_outputs(result: &BacktestResult, out_dir: &Path) -> Result<()> {
    let name = result.name();

    result
        .journal()
        .save(&out_dir.join(format!("{}.log", name)))
        .with_context(|| format!("Failed to write journal for {}", name))?;

    plot_time_series(
        &out_dir.join(format!("{}.svg", name)),
        name,
        "$",
        &[
            Series::new("Asset Value", result.asset_value_history()),
            Series::new("Stock Value", result.stock_value_history()),
            Series::new("Earned Premium", result.option_premium_history()),
        ],
    )
    .with_context(|| format!("Failed to plot {}", name))?;

    let rows = result
        .pricer
        .write_price_matrix(&out_dir.join(format!("{}-prices.csv", name)))?;
    info!("{}: wrote {} priced quotes", name, rows);
    Ok(())
}

fn cmd_backtest(config: &Config, only: Option<&str>) -> Result<()> {
    let strategies: Vec<_> = config
        .strategies
        .iter()
        .filter(|s| only.map_or(true, |name| s.name == name))
        .cloned()
        .collect();
    if strategies.is_empty() {
        anyhow::bail!("No strategy named {:?}", only.unwrap_or_default());
    }

    let out_dir = &config.paths.output_dir;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut loader = load_market(config)?;
    info!(
        "Loaded {} stock bars and {} option snapshots",
        loader.bar_count(),
        loader.snapshot_count()
    );

    let engine = BacktestEngine::new(config.backtest.clone());
    let pb = progress_bar(strategies.len() as u64)?;
    let mut results = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        pb.set_message(strategy.name.clone());
        let result = engine
            .run(strategy, &mut loader)
            .context("Backtest failed")?;
        save_outputs(&result, out_dir)?;
        results.push(result);
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let combined: Vec<Series<'_>> = results
        .iter()
        .map(|r| Series::new(r.name(), r.asset_value_history()))
        .collect();
    plot_time_series(&out_dir.join("all.svg"), "Asset Value", "$", &combined)
        .context("Failed to plot combined chart")?;

    for result in &results {
        println!("{}", SEPARATOR);
        println!("{}", result.summary());
    }
    println!("{}", SEPARATOR);
    println!("Output written to {}", out_dir.display());
    Ok(())
}

fn cmd_simulate(config: &Config, paths: Option<usize>, seed: Option<u64>) -> Result<()> {
    let mut sim = config.simulation.clone();
    if let Some(paths) = paths {
        sim.paths = paths;
    }
    if let Some(seed) = seed {
        sim.seed = seed;
    }

    let pb = progress_bar(sim.paths as u64)?;
    pb.set_message(sim.symbol.clone());
    let result = simulate_with_progress(&sim, &pb)?;
    pb.finish_and_clear();

    let out_dir = &config.paths.output_dir;
    fs::create_dir_all(out_dir)?;
    let chart = out_dir.join(format!("{}-cdf.svg", sim.symbol));
    plot_cdf(
        &chart,
        &format!("{} {}-day price distribution", sim.symbol, sim.days),
        "Price",
        &result.cumulative_histogram(sim.bins),
        Some(("Start price", sim.start_price)),
    )
    .context("Failed to plot distribution")?;

    println!("{}", SEPARATOR);
    println!(
        "{} {}x, {} paths over {} days",
        sim.symbol, sim.leverage, sim.paths, sim.days
    );
    println!("{}", SEPARATOR);
    println!("Start price: {:.2}", sim.start_price);
    println!(
        "Median: {:.2}  5%: {:.2}  95%: {:.2}",
        result.quantile(0.5).unwrap_or_default(),
        result.quantile(0.05).unwrap_or_default(),
        result.quantile(0.95).unwrap_or_default()
    );
    println!(
        "P(end below start): {:.1}%",
        result.probability_below(sim.start_price) * 100.0
    );
    println!("Annualized vol: {:.2}%", result.annualized_volatility() * 100.0);
    println!("Chart: {}", chart.display());
    Ok(())
}

fn cmd_replay(config: &Config) -> Result<()> {
    let mut loader = load_market(config)?;
    while let Some(tick) = loader.next_tick() {
        let open = tick
            .stock
            .as_ref()
            .map(|bar| bar.open.to_string())
            .unwrap_or_else(|| "-".to_string());
        let eod = if loader.is_end_of_day() { " EOD" } else { "" };
        println!("{} {} {}{}", tick.time, open, tick.options.len(), eod);
    }
    info!("Replayed {} ticks", loader.tick_count());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("option_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref()).context("Invalid configuration")?;

    match cli.command {
        Commands::Backtest { strategy } => cmd_backtest(&config, strategy.as_deref())?,
        Commands::Simulate { paths, seed } => cmd_simulate(&config, paths, seed)?,
        Commands::Replay => cmd_replay(&config)?,
    }

    Ok(())
}
