//! Performance metrics calculator.
//!
//! Calculates strategy performance statistics from the daily NAV series and
//! the option trade records of a backtest.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::BacktestResult;

/// Strategy performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Return metrics
    pub initial_value: Decimal,
    pub final_value: Decimal,
    pub total_return_pct: f64,

    // Risk metrics
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,

    // Risk-adjusted returns
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,

    // Option trades
    pub option_trades: usize,
    pub open_trades: usize,
    pub assigned_trades: usize,
    pub expired_trades: usize,
    pub assignment_rate: f64,
    pub net_premium: Decimal,
    pub avg_premium: Decimal,

    // Activity
    pub stock_trades: usize,
    pub trading_days: usize,
    pub total_commission: Decimal,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            initial_value: Decimal::ZERO,
            final_value: Decimal::ZERO,
            total_return_pct: 0.0,
            max_drawdown: Decimal::ZERO,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            option_trades: 0,
            open_trades: 0,
            assigned_trades: 0,
            expired_trades: 0,
            assignment_rate: 0.0,
            net_premium: Decimal::ZERO,
            avg_premium: Decimal::ZERO,
            stock_trades: 0,
            trading_days: 0,
            total_commission: Decimal::ZERO,
        }
    }
}

impl PerformanceMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Final Value: ${:.2} (from ${:.2})\n\
             Total Return: {:.2}%\n\
             Max Drawdown: ${:.2} ({:.2}%)\n\
             Sharpe Ratio: {:.2}\n\
             Sortino Ratio: {:.2}\n\
             \n\
             Option Trades: {} ({} open, {} assigned, {} expired)\n\
             Assignment Rate: {:.1}%\n\
             Net Premium: ${:.2} (avg ${:.2})\n\
             Stock Trades: {}\n\
             Trading Days: {}\n\
             Commission: ${:.2}",
            self.final_value,
            self.initial_value,
            self.total_return_pct,
            self.max_drawdown,
            self.max_drawdown_pct,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.option_trades,
            self.open_trades,
            self.assigned_trades,
            self.expired_trades,
            self.assignment_rate * 100.0,
            self.net_premium,
            self.avg_premium,
            self.stock_trades,
            self.trading_days,
            self.total_commission,
        )
    }
}

/// Drawdown analysis details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub peak_time: Option<NaiveDateTime>,
    pub trough_time: Option<NaiveDateTime>,
    pub drawdown_periods: usize,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics from a backtest result.
    pub fn calculate(result: &BacktestResult) -> PerformanceMetrics {
        let book = &result.book;
        let nav = result.asset_value_history();

        let initial_value = book.initial_cash();
        let final_value = result.final_value();
        let total_return_pct = Self::total_return_pct(initial_value, final_value);

        let drawdown = Self::analyze_drawdown(nav);
        let returns = Self::daily_returns(initial_value, nav);

        let option_trades = book.num_option_trades();
        let assigned_trades = book.assigned_option_trades().len();
        let expired_trades = book.expired_option_trades().len();
        let settled = assigned_trades + expired_trades;
        let assignment_rate = if settled > 0 {
            assigned_trades as f64 / settled as f64
        } else {
            0.0
        };

        PerformanceMetrics {
            initial_value,
            final_value,
            total_return_pct,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_pct: drawdown.max_drawdown_pct,
            sharpe_ratio: Self::sharpe_ratio(&returns),
            sortino_ratio: Self::sortino_ratio(&returns),
            option_trades,
            open_trades: book.open_option_trades().len(),
            assigned_trades,
            expired_trades,
            assignment_rate,
            net_premium: book.option_premium_sum(),
            avg_premium: book.avg_premium(),
            stock_trades: book.trades().len() - option_trades,
            trading_days: nav.len(),
            total_commission: book.total_commission(),
        }
    }

    fn total_return_pct(initial: Decimal, final_val: Decimal) -> f64 {
        let init: f64 = initial.try_into().unwrap_or(0.0);
        let fin: f64 = final_val.try_into().unwrap_or(0.0);
        if init <= 0.0 {
            return 0.0;
        }
        (fin - init) / init * 100.0
    }

    /// Close-to-close returns, the first measured against starting cash.
    pub fn daily_returns(initial: Decimal, nav: &[(NaiveDateTime, Decimal)]) -> Vec<f64> {
        let mut prev: f64 = initial.try_into().unwrap_or(0.0);
        let mut returns = Vec::with_capacity(nav.len());
        for (_, value) in nav {
            let curr: f64 = (*value).try_into().unwrap_or(0.0);
            if prev != 0.0 {
                returns.push((curr - prev) / prev);
            }
            prev = curr;
        }
        returns
    }

    /// Annualized Sharpe ratio (risk-free rate = 0, 252 trading days).
    pub fn sharpe_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 {
            return 0.0;
        }

        (mean * 252.0_f64.sqrt()) / std_dev
    }

    /// Annualized Sortino ratio (downside deviation only).
    pub fn sortino_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let downside_variance = returns
            .iter()
            .filter(|&&r| r < 0.0)
            .map(|r| r.powi(2))
            .sum::<f64>()
            / returns.len() as f64;
        let downside_dev = downside_variance.sqrt();

        if downside_dev == 0.0 {
            return 0.0;
        }

        (mean * 252.0_f64.sqrt()) / downside_dev
    }

    /// Analyze drawdown from a NAV series.
    pub fn analyze_drawdown(nav: &[(NaiveDateTime, Decimal)]) -> DrawdownAnalysis {
        let Some(&(first_time, first_value)) = nav.first() else {
            return DrawdownAnalysis {
                max_drawdown: Decimal::ZERO,
                max_drawdown_pct: 0.0,
                peak_time: None,
                trough_time: None,
                drawdown_periods: 0,
            };
        };

        let mut peak = first_value;
        let mut peak_time = first_time;
        let mut max_drawdown = Decimal::ZERO;
        let mut max_drawdown_pct = 0.0;
        let mut max_peak_time = None;
        let mut trough_time = None;
        let mut in_drawdown = false;
        let mut periods = 0;

        for &(time, value) in nav {
            if value >= peak {
                peak = value;
                peak_time = time;
                in_drawdown = false;
                continue;
            }

            if !in_drawdown {
                in_drawdown = true;
                periods += 1;
            }

            let drawdown = peak - value;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                let dd: f64 = drawdown.try_into().unwrap_or(0.0);
                let pk: f64 = peak.try_into().unwrap_or(0.0);
                max_drawdown_pct = if pk > 0.0 { dd / pk * 100.0 } else { 0.0 };
                max_peak_time = Some(peak_time);
                trough_time = Some(time);
            }
        }

        DrawdownAnalysis {
            max_drawdown,
            max_drawdown_pct,
            peak_time: max_peak_time,
            trough_time,
            drawdown_periods: periods,
        }
    }
}
