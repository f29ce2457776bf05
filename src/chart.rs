//! SVG charts for backtest histories and simulated distributions.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use plotters::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

const SIZE: (u32, u32) = (1200, 700);
const COLORS: [RGBColor; 6] = [BLUE, RED, GREEN, MAGENTA, CYAN, BLACK];

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("Chart '{0}' has no data points")]
    NoData(String),

    #[error("Drawing error: {0}")]
    Drawing(String),
}

fn drawing(e: impl std::fmt::Display) -> ChartError {
    ChartError::Drawing(e.to_string())
}

/// One named line of a time-series chart.
#[derive(Debug, Clone, Copy)]
pub struct Series<'a> {
    pub name: &'a str,
    pub points: &'a [(NaiveDateTime, Decimal)],
}

impl<'a> Series<'a> {
    pub fn new(name: &'a str, points: &'a [(NaiveDateTime, Decimal)]) -> Self {
        Self { name, points }
    }
}

fn padded(min: f64, max: f64) -> (f64, f64) {
    if (max - min).abs() < f64::EPSILON {
        (min - 1.0, max + 1.0)
    } else {
        let pad = (max - min) * 0.05;
        (min - pad, max + pad)
    }
}

/// Plot several value histories against time.
///
/// Empty series are left out of the chart and the legend.
pub fn plot_time_series(
    path: &Path,
    title: &str,
    unit: &str,
    series: &[Series<'_>],
) -> Result<(), ChartError> {
    let lines: Vec<(&str, Vec<(f64, f64)>)> = series
        .iter()
        .filter(|s| !s.points.is_empty())
        .map(|s| {
            let points = s
                .points
                .iter()
                .map(|(t, v)| {
                    (
                        t.and_utc().timestamp() as f64,
                        v.to_f64().unwrap_or_default(),
                    )
                })
                .collect();
            (s.name, points)
        })
        .collect();

    if lines.is_empty() {
        return Err(ChartError::NoData(title.to_string()));
    }

    let (x_min, x_max, y_min, y_max) = lines.iter().flat_map(|(_, p)| p.iter()).fold(
        (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
        |(x0, x1, y0, y1), &(x, y)| (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
    );
    let x_max = if x_max > x_min { x_max } else { x_min + 86_400.0 };
    let (y_min, y_max) = padded(y_min, y_max);

    debug!("Plotting {} series to {}", lines.len(), path.display());

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(drawing)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(90)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(drawing)?;

    let format_time = |x: &f64| {
        DateTime::from_timestamp(*x as i64, 0)
            .map(|t| t.format("%m-%d").to_string())
            .unwrap_or_default()
    };

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc(unit)
        .x_label_formatter(&format_time)
        .draw()
        .map_err(drawing)?;

    for (i, (name, points)) in lines.into_iter().enumerate() {
        let color = COLORS[i % COLORS.len()];
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))
            .map_err(drawing)?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(drawing)?;

    root.present().map_err(drawing)?;
    info!("Saved chart {}", path.display());
    Ok(())
}

/// Plot a cumulative distribution with an optional vertical marker.
///
/// `points` are `(value, cumulative fraction)` pairs in ascending order.
pub fn plot_cdf(
    path: &Path,
    title: &str,
    x_desc: &str,
    points: &[(f64, f64)],
    marker: Option<(&str, f64)>,
) -> Result<(), ChartError> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Err(ChartError::NoData(title.to_string()));
    };

    let mut x_min = first.0;
    let mut x_max = last.0;
    if let Some((_, x)) = marker {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
    }
    let (x_min, x_max) = padded(x_min, x_max);

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(drawing)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, 0.0..1.0)
        .map_err(drawing)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("Cumulative probability")
        .draw()
        .map_err(drawing)?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(2)))
        .map_err(drawing)?
        .label("CDF")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    if let Some((label, x)) = marker {
        chart
            .draw_series(LineSeries::new(vec![(x, 0.0), (x, 1.0)], RED.stroke_width(2)))
            .map_err(drawing)?
            .label(label)
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(drawing)?;

    root.present().map_err(drawing)?;
    info!("Saved chart {}", path.display());
    Ok(())
}
